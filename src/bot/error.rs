//! Error types for the bot core and its adapters.
//!
//! [`BotError`] is the per-turn taxonomy surfaced to chat users. Each variant
//! is scoped to a single user's turn; none of them is fatal to the process.
//!
//! # Recovery Policy
//!
//! 1. **Structural errors** (`InvalidArguments`, `UnrecognizedChoice`,
//!    `MissingKeyFile`, `KeyFileUnavailable`, `CredentialStorage`,
//!    `NoActiveSession`) reset the conversation to idle and tear down any
//!    session the user had.
//!
//! 2. **Connection errors** (`AuthError`, `NetworkError`) are reported as text
//!    and leave the session in the command loop, so the next command retries
//!    the connection.
//!
//! 3. **Execution errors** (`ExecutionError`) are captured into the command
//!    output and never interrupt the loop.
//!
//! # Classification Strategy
//!
//! SSH connection failures arrive as opaque text. They are split into
//! authentication failures and network failures by message pattern, with
//! authentication patterns taking precedence when both match.

use thiserror::Error;

/// Errors produced while handling one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BotError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("choose 'key' or 'password'")]
    UnrecognizedChoice,

    #[error("a private key file was expected")]
    MissingKeyFile,

    #[error("could not download the key file: {0}")]
    KeyFileUnavailable(String),

    #[error("could not store credentials: {0}")]
    CredentialStorage(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("connection failed: {0}")]
    NetworkError(String),

    #[error("{0}")]
    ExecutionError(String),

    #[error("no active SSH session")]
    NoActiveSession,
}

impl BotError {
    /// Whether this error resets the conversation to idle.
    ///
    /// Connection and execution errors keep the session in the command loop.
    pub fn resets_conversation(&self) -> bool {
        !matches!(
            self,
            BotError::AuthError(_) | BotError::NetworkError(_) | BotError::ExecutionError(_)
        )
    }
}

/// Errors raised by a chat transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),

    #[error("bot api error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether a failed Bot API call is worth retrying.
    ///
    /// Network errors, server errors and rate limits are transient; other API
    /// errors (bad request, forbidden, unknown chat) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(_) => true,
            TransportError::Api { code, .. } => *code == 429 || *code >= 500,
            TransportError::Decode(_) | TransportError::Io(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs embed the bot token.
        TransportError::Http(err.without_url().to_string())
    }
}

/// Errors raised while loading configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Authentication error patterns that indicate rejected credentials.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "failed to load private key",
];

/// Classify an SSH connection failure message.
///
/// Returns [`BotError::AuthError`] when the message matches a known
/// authentication pattern (case-insensitive) and [`BotError::NetworkError`]
/// otherwise. Connection refused, timeouts, DNS failures, handshake and host
/// key rejections all land in the network bucket.
pub fn classify_connect_error(message: &str) -> BotError {
    let lower = message.to_lowercase();

    if AUTH_ERRORS.iter().any(|pattern| lower.contains(pattern)) {
        BotError::AuthError(message.to_string())
    } else {
        BotError::NetworkError(message.to_string())
    }
}
