//! Inbound chat events and the transport seam.
//!
//! A transport adapter turns whatever its platform delivers into
//! [`InboundEvent`]s and implements [`ChatTransport`] for replies. The core
//! never sees platform types.

use std::fmt;

use async_trait::async_trait;

use super::error::TransportError;
use super::types::{ChatId, Reply, UserId};

/// Delivers replies back to a chat.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, chat_id: ChatId, reply: Reply) -> Result<(), TransportError>;
}

/// A file attached to a chat message, fetched on demand.
#[async_trait]
pub trait Attachment: Send + Sync {
    /// File name as uploaded, if the platform reports one.
    fn file_name(&self) -> Option<&str>;

    /// Download the file contents.
    async fn fetch(&self) -> Result<Vec<u8>, TransportError>;
}

/// What the user sent.
pub enum EventKind {
    /// `/start`: usage help
    Help,
    /// `/ssh_connect <host> <user>` with its raw arguments
    StartSession { args: Vec<String> },
    /// `/ssh_disconnect`
    Disconnect,
    /// `/cancel`
    Cancel,
    /// Any other text, including unknown slash commands such as `/exit`
    Text(String),
    /// A file attachment
    Document(Box<dyn Attachment>),
}

impl EventKind {
    /// Short label for logs; never includes message content.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Help => "help",
            EventKind::StartSession { .. } => "start_session",
            EventKind::Disconnect => "disconnect",
            EventKind::Cancel => "cancel",
            EventKind::Text(_) => "text",
            EventKind::Document(_) => "document",
        }
    }

    /// Interpret a text message, mapping known bot commands.
    pub fn from_text(text: &str) -> Self {
        match parse_command(text) {
            Some(("start", _)) => EventKind::Help,
            Some(("ssh_connect", args)) => EventKind::StartSession { args },
            Some(("ssh_disconnect", _)) => EventKind::Disconnect,
            Some(("cancel", _)) => EventKind::Cancel,
            _ => EventKind::Text(text.to_string()),
        }
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::StartSession { args } => f
                .debug_struct("StartSession")
                .field("args", args)
                .finish(),
            EventKind::Document(doc) => f
                .debug_tuple("Document")
                .field(&doc.file_name())
                .finish(),
            // Text may be a password
            other => write!(f, "{}", other.label()),
        }
    }
}

/// One inbound event from a chat user.
#[derive(Debug)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(user_id: UserId, chat_id: ChatId, kind: EventKind) -> Self {
        Self {
            user_id,
            chat_id,
            kind,
        }
    }
}

/// Split `/name@Bot arg1 arg2` into a lowercase command name and arguments.
///
/// Returns `None` for text that is not a slash command.
pub fn parse_command(text: &str) -> Option<(&'static str, Vec<String>)> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let args = parts.map(str::to_string).collect();

    let known = match name.as_str() {
        "start" => "start",
        "ssh_connect" => "ssh_connect",
        "ssh_disconnect" => "ssh_disconnect",
        "cancel" => "cancel",
        "exit" => "exit",
        _ => return None,
    };
    Some((known, args))
}
