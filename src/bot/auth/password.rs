//! Password-based SSH authentication.

use async_trait::async_trait;
use russh::client;

use crate::bot::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Password authentication strategy.
///
/// Holds its own copy of the secret for the duration of one connect attempt.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    /// Create a new password authentication strategy.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| format!("Password authentication failed: {}", e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
