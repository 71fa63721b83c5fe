//! russh client handler and host key policy.
//!
//! # Architecture
//!
//! - `SshClientHandler`: A russh client handler that decides whether to trust
//!   the server's host key according to a [`HostKeyPolicy`].
//!
//! # Security Note
//!
//! The default policy, [`HostKeyPolicy::AcceptNew`], trusts every host key
//! (similar to `StrictHostKeyChecking=no` in OpenSSH). Deployments that care
//! about man-in-the-middle attacks should set `SSH_HOST_KEY_POLICY=known-hosts`.

use std::fmt;
use std::str::FromStr;

use russh::{client, keys};
use tracing::warn;

/// How unknown or changed server host keys are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Trust any host key on first use without recording it
    #[default]
    AcceptNew,
    /// Only accept keys already present in the user's `known_hosts`
    KnownHosts,
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept-new" | "accept" | "no" => Ok(HostKeyPolicy::AcceptNew),
            "known-hosts" | "strict" | "yes" => Ok(HostKeyPolicy::KnownHosts),
            other => Err(format!("unknown host key policy '{}'", other)),
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptNew => write!(f, "accept-new"),
            HostKeyPolicy::KnownHosts => write!(f, "known-hosts"),
        }
    }
}

/// Client handler for russh connections opened on behalf of a chat user.
pub struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl SshClientHandler {
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::AcceptNew => Ok(true),
            HostKeyPolicy::KnownHosts => {
                match keys::check_known_hosts(&self.host, self.port, server_public_key) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        warn!("Host key for {}:{} is not in known_hosts", self.host, self.port);
                        Ok(false)
                    }
                    Err(e) => {
                        warn!("Host key check for {}:{} failed: {}", self.host, self.port, e);
                        Ok(false)
                    }
                }
            }
        }
    }
}
