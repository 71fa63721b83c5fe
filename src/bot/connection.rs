//! Lazily established remote connection owned by one user session.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::client::{ShellConnector, ShellSession};
use super::credentials::CredentialMaterial;
use super::error::BotError;
use super::types::{CommandOutput, Target};

/// Remote connection for one chat user.
///
/// Connects on the first command, is reused for later commands, and is
/// re-established when the transport reports it closed. `close` may be
/// called any number of times.
pub struct RemoteConnection {
    session: Option<Box<dyn ShellSession>>,
    command_timeout: Option<Duration>,
}

impl RemoteConnection {
    pub fn new(command_timeout: Option<Duration>) -> Self {
        Self {
            session: None,
            command_timeout,
        }
    }

    /// Whether a live connection is currently held.
    pub fn is_established(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Connect unless a live connection already exists.
    pub async fn ensure_connected(
        &mut self,
        connector: &dyn ShellConnector,
        target: &Target,
        credentials: &CredentialMaterial,
    ) -> Result<(), BotError> {
        if self.is_established() {
            return Ok(());
        }

        if let Some(stale) = self.session.take() {
            info!("Connection to {} was lost, reconnecting", target);
            stale.close().await;
        }

        self.session = Some(connector.connect(target, credentials).await?);
        Ok(())
    }

    /// Run `command`, returning stdout followed by stderr as one text blob.
    ///
    /// Execution faults are returned as `"Error: <description>"` text so the
    /// command loop stays usable.
    pub async fn execute(&mut self, command: &str) -> String {
        let Some(session) = self.session.as_ref() else {
            return format!("Error: {}", BotError::NoActiveSession);
        };

        match session.exec(command, self.command_timeout).await {
            Ok(output) => render_output(&output, self.command_timeout),
            Err(e) => {
                let err = BotError::ExecutionError(e);
                warn!("Command failed: {}", err);
                format!("Error: {}", err)
            }
        }
    }

    /// Disconnect and drop the transport. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            debug!("Remote connection closed");
        }
    }
}

fn render_output(output: &CommandOutput, timeout: Option<Duration>) -> String {
    let mut text = String::with_capacity(output.stdout.len() + output.stderr.len());
    text.push_str(&output.stdout);
    text.push_str(&output.stderr);

    if output.timed_out {
        let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("[command timed out after {}s]", secs));
    }
    text
}
