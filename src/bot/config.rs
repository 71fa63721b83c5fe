//! Configuration resolution for the SSH bot.
//!
//! Values come from the environment (a `.env` file is loaded by the
//! binaries) with built-in defaults as fallback.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TELEGRAM_TOKEN` | - | Bot API token (required by the Telegram binary) |
//! | `AUTHORIZED_USERS` | empty | Comma-separated user ids allowed to use the bot |
//! | `TELEGRAM_WEBHOOK_URL` | unset | Public webhook URL; long polling when unset |
//! | `TELEGRAM_WEBHOOK_SECRET` | unset | Expected `X-Telegram-Bot-Api-Secret-Token` |
//! | `BOT_LISTEN_PORT` | 8000 | Webhook listen port |
//! | `TELEGRAM_POLL_TIMEOUT` | 30s | Long polling timeout in seconds |
//! | `SSH_CONNECT_TIMEOUT` | 30s | Connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 0 | Command timeout in seconds, 0 disables it |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_HOST_KEY_POLICY` | accept-new | `accept-new` or `known-hosts` |
//! | `SESSION_IDLE_TIMEOUT` | 3600s | Idle session eviction, 0 disables it |
//! | `KEY_FILE_DIR` | system temp | Directory for uploaded key files |

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use super::client::SshSettings;
use super::error::ConfigError;
use super::session::HostKeyPolicy;
use super::types::UserId;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default SSH command timeout in seconds (0 = no timeout)
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 0;

/// Default idle session eviction in seconds (0 = never)
pub(crate) const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;

/// Default long polling timeout in seconds
pub(crate) const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Default webhook listen port
pub(crate) const DEFAULT_LISTEN_PORT: u16 = 8000;

pub(crate) const TOKEN_ENV_VAR: &str = "TELEGRAM_TOKEN";
pub(crate) const AUTHORIZED_USERS_ENV_VAR: &str = "AUTHORIZED_USERS";
pub(crate) const WEBHOOK_URL_ENV_VAR: &str = "TELEGRAM_WEBHOOK_URL";
pub(crate) const WEBHOOK_SECRET_ENV_VAR: &str = "TELEGRAM_WEBHOOK_SECRET";
pub(crate) const LISTEN_PORT_ENV_VAR: &str = "BOT_LISTEN_PORT";
pub(crate) const POLL_TIMEOUT_ENV_VAR: &str = "TELEGRAM_POLL_TIMEOUT";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const HOST_KEY_POLICY_ENV_VAR: &str = "SSH_HOST_KEY_POLICY";
pub(crate) const IDLE_TIMEOUT_ENV_VAR: &str = "SESSION_IDLE_TIMEOUT";
pub(crate) const KEY_FILE_DIR_ENV_VAR: &str = "KEY_FILE_DIR";

/// Static allow-list of chat users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    allowed: HashSet<UserId>,
}

impl AccessList {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            allowed: users.into_iter().collect(),
        }
    }

    pub fn allows(&self, user_id: UserId) -> bool {
        self.allowed.contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl FromStr for AccessList {
    type Err = String;

    /// Parse a comma- or whitespace-separated list of numeric user ids.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i64>()
                    .map(UserId)
                    .map_err(|_| format!("'{}' is not a user id", part))
            })
            .collect::<Result<HashSet<_>, _>>()
            .map(|allowed| Self { allowed })
    }
}

/// Delivery mode for Telegram updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    LongPolling { timeout: Duration },
    Webhook {
        url: String,
        secret: Option<String>,
        port: u16,
    },
}

/// Settings that shape the bot core.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub access: AccessList,
    pub ssh: SshSettings,
    pub command_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub key_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Resolve every core setting from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let access = match env::var(AUTHORIZED_USERS_ENV_VAR) {
            Ok(raw) => raw.parse::<AccessList>().map_err(|_| ConfigError::Invalid {
                var: AUTHORIZED_USERS_ENV_VAR,
                value: raw,
            })?,
            Err(_) => AccessList::default(),
        };
        if access.is_empty() {
            warn!(
                "{} is empty: every user will be ignored",
                AUTHORIZED_USERS_ENV_VAR
            );
        }

        let host_key_policy = match env::var(HOST_KEY_POLICY_ENV_VAR) {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                var: HOST_KEY_POLICY_ENV_VAR,
                value: raw,
            })?,
            Err(_) => HostKeyPolicy::default(),
        };

        Ok(Self {
            access,
            ssh: SshSettings {
                connect_timeout: Duration::from_secs(resolve_connect_timeout()),
                compress: resolve_compression(),
                host_key_policy,
            },
            command_timeout: non_zero_secs(resolve_command_timeout()),
            idle_timeout: non_zero_secs(resolve_idle_timeout()),
            key_dir: env::var(KEY_FILE_DIR_ENV_VAR)
                .ok()
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
        })
    }
}

/// Telegram adapter settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub delivery: Delivery,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing(TOKEN_ENV_VAR))?;

        let delivery = match env::var(WEBHOOK_URL_ENV_VAR) {
            Ok(url) if !url.is_empty() => Delivery::Webhook {
                url,
                secret: env::var(WEBHOOK_SECRET_ENV_VAR)
                    .ok()
                    .filter(|s| !s.is_empty()),
                port: env_parse(LISTEN_PORT_ENV_VAR).unwrap_or(DEFAULT_LISTEN_PORT),
            },
            _ => Delivery::LongPolling {
                timeout: Duration::from_secs(
                    env_parse(POLL_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
                ),
            },
        };

        Ok(Self { token, delivery })
    }
}

/// Parse an environment variable, ignoring it when unset or malformed.
fn env_parse<T: FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Resolve the connection timeout in seconds: env var -> default
pub(crate) fn resolve_connect_timeout() -> u64 {
    env_parse(CONNECT_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
}

/// Resolve the command timeout in seconds: env var -> default (0 = none)
pub(crate) fn resolve_command_timeout() -> u64 {
    env_parse(COMMAND_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
}

/// Resolve the idle eviction timeout in seconds: env var -> default (0 = never)
pub(crate) fn resolve_idle_timeout() -> u64 {
    env_parse(IDLE_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
}

/// Resolve the compression setting: env var -> default (true)
pub(crate) fn resolve_compression() -> bool {
    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }
    true
}
