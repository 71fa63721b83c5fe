//! Shared value types for the bot core.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::client::parse_address;
use super::error::BotError;

/// Chat user identity as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat (conversation) a reply is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote host and account a session connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host exactly as the user typed it (used in the shell prompt)
    pub address: String,
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl Target {
    /// Build a target from the two start-session arguments.
    ///
    /// The host may carry a `:port` suffix; port 22 is used otherwise.
    /// IPv6 hosts are written bare or in brackets (`[::1]:2222`).
    pub fn parse(address: &str, username: &str) -> Result<Self, BotError> {
        let (host, port) = parse_address(address).map_err(BotError::InvalidArguments)?;
        if host.is_empty() || username.is_empty() {
            return Err(BotError::InvalidArguments(
                "host and user must not be empty".to_string(),
            ));
        }

        Ok(Self {
            address: address.to_string(),
            host,
            port,
            username: username.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.address)
    }
}

/// Authentication method chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Key,
    Password,
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthKind::Key => write!(f, "key"),
            AuthKind::Password => write!(f, "password"),
        }
    }
}

/// How the transport should render a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFormat {
    /// Sent as-is, no markup interpretation
    Plain,
    /// Already escaped HTML (`<pre>`, `<code>`)
    Html,
}

/// Keyboard attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKeyboard {
    /// One-time keyboard with one labelled option per row
    Choices(Vec<String>),
    /// Hide any keyboard left over from a previous prompt
    Remove,
}

/// Outbound message produced by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub format: ReplyFormat,
    pub keyboard: Option<ReplyKeyboard>,
}

impl Reply {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: ReplyFormat::Plain,
            keyboard: None,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: ReplyFormat::Html,
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: ReplyKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// -1 when the server sent no exit status
    pub exit_code: i32,
    /// Whether the command timed out (partial output only)
    pub timed_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_default_port() {
        let target = Target::parse("10.0.0.5", "alice").unwrap();
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.port, 22);
        assert_eq!(target.address, "10.0.0.5");
        assert_eq!(target.to_string(), "alice@10.0.0.5");
    }

    #[test]
    fn test_target_with_port() {
        let target = Target::parse("example.com:2222", "bob").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 2222);
    }

    #[test]
    fn test_target_invalid_port() {
        let err = Target::parse("example.com:ssh", "bob").unwrap_err();
        assert!(matches!(err, BotError::InvalidArguments(_)));
    }

    #[test]
    fn test_target_ipv6_forms() {
        let bare = Target::parse("2001:db8::5", "carol").unwrap();
        assert_eq!((bare.host.as_str(), bare.port), ("2001:db8::5", 22));

        let bracketed = Target::parse("[::1]", "carol").unwrap();
        assert_eq!((bracketed.host.as_str(), bracketed.port), ("::1", 22));

        let with_port = Target::parse("[::1]:2222", "carol").unwrap();
        assert_eq!((with_port.host.as_str(), with_port.port), ("::1", 2222));
        assert_eq!(with_port.address, "[::1]:2222");
    }

    #[test]
    fn test_target_empty_host() {
        let err = Target::parse(":22", "bob").unwrap_err();
        assert!(matches!(err, BotError::InvalidArguments(_)));
    }

    #[test]
    fn test_reply_builders() {
        let reply = Reply::plain("hi").with_keyboard(ReplyKeyboard::Remove);
        assert_eq!(reply.format, ReplyFormat::Plain);
        assert_eq!(reply.keyboard, Some(ReplyKeyboard::Remove));
        assert_eq!(Reply::html("<b>x</b>").format, ReplyFormat::Html);
    }

    #[test]
    fn test_auth_kind_display() {
        assert_eq!(AuthKind::Key.to_string(), "key");
        assert_eq!(AuthKind::Password.to_string(), "password");
    }
}
