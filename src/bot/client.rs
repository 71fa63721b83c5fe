//! SSH client connection and command execution.
//!
//! This module defines the narrow seam between the bot core and the SSH
//! protocol library, and the russh-backed implementation of it.
//!
//! ## Connection Lifecycle
//!
//! 1. **Address Parsing**: Parse the target into host and port components.
//!    Supports `host:port` and IPv6 forms with default port 22 if not specified.
//!
//! 2. **Client Configuration**: Build the russh client configuration with
//!    keepalive and compression settings.
//!
//! 3. **Connection Establishment**: Establish the TCP connection and handshake
//!    with a configurable timeout. Host keys are checked by
//!    [`SshClientHandler`] according to the configured [`HostKeyPolicy`].
//!
//! 4. **Authentication**: Authenticate with the strategy produced by the
//!    session's [`CredentialMaterial`] (key file or password).
//!
//! 5. **Command Execution**: Execute commands on a fresh channel and collect
//!    stdout, stderr and the exit code.
//!
//! There is no retry loop: a failed connect is reported to the chat user, and
//! their next command attempts a new connection.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client};
use tracing::{debug, info, warn};

use super::credentials::CredentialMaterial;
use super::error::{BotError, classify_connect_error};
use super::session::{HostKeyPolicy, SshClientHandler};
use super::types::{CommandOutput, Target};

/// Opens authenticated shell sessions to remote hosts.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Connect to `target` and authenticate with `credentials`.
    ///
    /// Failures are classified into [`BotError::AuthError`] or
    /// [`BotError::NetworkError`].
    async fn connect(
        &self,
        target: &Target,
        credentials: &CredentialMaterial,
    ) -> Result<Box<dyn ShellSession>, BotError>;
}

/// One authenticated connection able to run commands.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Run `command` and collect its output.
    ///
    /// With a `timeout`, partial output is returned with `timed_out` set
    /// instead of an error.
    async fn exec(&self, command: &str, timeout: Option<Duration>)
    -> Result<CommandOutput, String>;

    /// Whether the underlying transport has gone away.
    fn is_closed(&self) -> bool;

    /// Disconnect from the remote host.
    async fn close(&self);
}

/// Connection settings shared by every session the bot opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshSettings {
    pub connect_timeout: Duration,
    pub compress: bool,
    pub host_key_policy: HostKeyPolicy,
}

/// [`ShellConnector`] backed by russh.
pub struct RusshConnector {
    settings: SshSettings,
}

impl RusshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ShellConnector for RusshConnector {
    async fn connect(
        &self,
        target: &Target,
        credentials: &CredentialMaterial,
    ) -> Result<Box<dyn ShellSession>, BotError> {
        info!(
            "Connecting to {} with {} authentication, timeout {}s, compress={}, host keys={}",
            target,
            credentials.kind(),
            self.settings.connect_timeout.as_secs(),
            self.settings.compress,
            self.settings.host_key_policy
        );

        let handle = connect_to_ssh(target, credentials, &self.settings)
            .await
            .map_err(|e| {
                warn!("SSH connection to {} failed: {}", target, e);
                classify_connect_error(&e)
            })?;

        info!("Connected to {}", target);
        Ok(Box::new(RusshSession { handle }))
    }
}

/// Live russh connection.
pub struct RusshSession {
    handle: client::Handle<SshClientHandler>,
}

#[async_trait]
impl ShellSession for RusshSession {
    async fn exec(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, String> {
        execute_ssh_command(&self.handle, command, timeout).await
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "Session closed by user", "en")
            .await
        {
            debug!("Error while disconnecting: {}", e);
        }
    }
}

/// Build russh client configuration with the specified settings.
///
/// Creates an `Arc<client::Config>` with:
/// - No inactivity timeout (sessions live until the chat user disconnects)
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` flag (ZLIB if enabled, NONE if disabled)
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Parse address string into host and port components.
///
/// Supports the following formats:
/// - `host:port` - Returns the specified host and port
/// - `host` - Returns the host with default SSH port (22)
/// - `2001:db8::5` - A bare IPv6 address, default port
/// - `[::1]` or `[::1]:2222` - Bracketed IPv6, brackets stripped
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), String> {
    if address.parse::<Ipv6Addr>().is_ok() {
        return Ok((address.to_string(), 22));
    }

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("Missing closing bracket in {}", address))?;
        let port = match tail {
            "" => 22,
            _ => tail
                .strip_prefix(':')
                .ok_or_else(|| format!("Unexpected text after address: {}", tail))?
                .parse::<u16>()
                .map_err(|e| format!("Invalid port number: {}", e))?,
        };
        return Ok((host.to_string(), port));
    }

    if let Some((host, port_str)) = address.rsplit_once(':') {
        let port = port_str
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {}", e))?;
        Ok((host.to_string(), port))
    } else {
        // No port specified, use default SSH port
        Ok((address.to_string(), 22))
    }
}

/// Establish an SSH connection and authenticate.
///
/// 1. Builds client configuration
/// 2. Connects with timeout
/// 3. Authenticates using the credential material's strategy
async fn connect_to_ssh(
    target: &Target,
    credentials: &CredentialMaterial,
    settings: &SshSettings,
) -> Result<client::Handle<SshClientHandler>, String> {
    let config = build_client_config(settings.compress);
    let handler = SshClientHandler::new(&target.host, target.port, settings.host_key_policy);

    let connect_future = client::connect(config, (target.host.as_str(), target.port), handler);

    let mut handle = tokio::time::timeout(settings.connect_timeout, connect_future)
        .await
        .map_err(|_| format!("Connection timed out after {:?}", settings.connect_timeout))?
        .map_err(|e| format!("Failed to connect: {}", e))?;

    let strategy = credentials.auth_strategy().map_err(|e| e.to_string())?;
    debug!("Authenticating {} with strategy {}", target, strategy.name());

    let success = strategy
        .authenticate(&mut handle, &target.username)
        .await?;

    if !success {
        return Err(format!(
            "Authentication failed: {} authentication rejected",
            strategy.name()
        ));
    }

    Ok(handle)
}

/// Execute a command on an SSH connection.
///
/// Opens a session channel, executes the command, and collects the output.
/// If a `timeout` is set and expires, returns partial output with
/// `timed_out: true` instead of an error, keeping the connection alive.
///
/// Returns -1 as exit code if the remote server doesn't provide one.
pub(crate) async fn execute_ssh_command(
    handle: &client::Handle<SshClientHandler>,
    command: &str,
    timeout: Option<Duration>,
) -> Result<CommandOutput, String> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| format!("Failed to open channel: {}", e))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| format!("Failed to execute command: {}", e))?;

    // Pre-allocate buffers to reduce reallocations during output collection
    let mut stdout = Vec::with_capacity(4096);
    let mut stderr = Vec::with_capacity(1024);
    let mut exit_code: Option<u32> = None;

    let collect = async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    // ext == 1 is stderr in SSH protocol
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                }
                Some(ChannelMsg::Eof) => {
                    // Continue to wait for exit status if not received yet
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
    };

    let timed_out = match timeout {
        Some(limit) => tokio::time::timeout(limit, collect).await.is_err(),
        None => {
            collect.await;
            false
        }
    };

    if timed_out {
        warn!(
            "Command timed out after {:?}, returning partial output ({} bytes stdout, {} bytes stderr)",
            timeout,
            stdout.len(),
            stderr.len()
        );
    }

    // Always close the channel gracefully to keep the connection alive
    let _ = channel.close().await;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: exit_code.map(|c| c as i32).unwrap_or(-1),
        timed_out,
    })
}
