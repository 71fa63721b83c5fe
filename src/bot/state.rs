//! Conversation state machine.
//!
//! The flow a chat user walks through to reach a working shell:
//!
//! ```text
//! Idle ─ /ssh_connect host user ─▶ AwaitingAuthChoice
//! AwaitingAuthChoice ─ "key" ─▶ AwaitingKeyFile ─ file ─▶ CommandLoop
//! AwaitingAuthChoice ─ "password" ─▶ AwaitingPassword ─ text ─▶ CommandLoop
//! CommandLoop ─ command ─▶ CommandLoop
//! any non-idle ─ /exit, /ssh_disconnect, /cancel ─▶ Closed
//! ```
//!
//! [`transition`] is pure: it decides which [`Action`] an event triggers in a
//! given state and never touches sessions, files or the network. The
//! [`Bot`](crate::bot::machine::Bot) executes the action.

use std::fmt;

use super::error::BotError;
use super::event::{Attachment, EventKind};
use super::types::{AuthKind, Target};

/// Texts that end the command loop, compared case-insensitively.
pub const DISCONNECT_SENTINELS: &[&str] = &["/exit", "/ssh_disconnect"];

/// Where a user is in the conversation.
///
/// `Idle` and `Closed` are never stored: a user without a registered session
/// is idle, and a turn that tears the session down reports `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingAuthChoice,
    AwaitingKeyFile,
    AwaitingPassword,
    CommandLoop,
    Closed,
}

impl ConversationState {
    /// Whether a session exists in this state.
    pub fn is_active(self) -> bool {
        !matches!(self, ConversationState::Idle | ConversationState::Closed)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationState::Idle => "idle",
            ConversationState::AwaitingAuthChoice => "awaiting_auth_choice",
            ConversationState::AwaitingKeyFile => "awaiting_key_file",
            ConversationState::AwaitingPassword => "awaiting_password",
            ConversationState::CommandLoop => "command_loop",
            ConversationState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Disconnect,
    Cancel,
}

/// Side effect requested by a transition.
pub enum Action<'a> {
    /// Reply with usage; state unchanged
    Help,
    /// Tear down any existing session and start a new one
    Begin(Target),
    /// Record the auth method and prompt for the credential
    ChooseAuth(AuthKind),
    /// Persist the attached key and enter the command loop
    AcceptKey(&'a dyn Attachment),
    /// Keep the text as the password and enter the command loop
    AcceptPassword(&'a str),
    /// Run a command on the remote host
    Run(&'a str),
    /// Tear the session down
    Close(CloseReason),
    /// Disconnect or cancel with nothing open
    NothingToClose,
    /// Reply with a hint; state unchanged
    Ignore(&'static str),
}

impl fmt::Debug for Action<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Help => write!(f, "Help"),
            Action::Begin(target) => write!(f, "Begin({})", target),
            Action::ChooseAuth(kind) => write!(f, "ChooseAuth({})", kind),
            Action::AcceptKey(doc) => write!(f, "AcceptKey({:?})", doc.file_name()),
            Action::AcceptPassword(_) => write!(f, "AcceptPassword(<redacted>)"),
            Action::Run(command) => write!(f, "Run({:?})", command),
            Action::Close(reason) => write!(f, "Close({:?})", reason),
            Action::NothingToClose => write!(f, "NothingToClose"),
            Action::Ignore(hint) => write!(f, "Ignore({:?})", hint),
        }
    }
}

/// Decide what `event` does in `state`.
///
/// Errors are structural: the caller resets the user to idle.
pub fn transition<'a>(
    state: ConversationState,
    event: &'a EventKind,
) -> Result<Action<'a>, BotError> {
    use ConversationState::*;

    match (state, event) {
        (_, EventKind::Help) => Ok(Action::Help),
        (_, EventKind::StartSession { args }) => start_session(args).map(Action::Begin),

        (Idle | Closed, EventKind::Disconnect | EventKind::Cancel) => Ok(Action::NothingToClose),
        (_, EventKind::Disconnect) => Ok(Action::Close(CloseReason::Disconnect)),
        (_, EventKind::Cancel) => Ok(Action::Close(CloseReason::Cancel)),

        (Idle | Closed, EventKind::Text(_) | EventKind::Document(_)) => {
            Err(BotError::NoActiveSession)
        }

        (AwaitingAuthChoice, EventKind::Text(text)) => parse_auth_choice(text)
            .map(Action::ChooseAuth)
            .ok_or(BotError::UnrecognizedChoice),
        (AwaitingAuthChoice, EventKind::Document(_)) => Err(BotError::UnrecognizedChoice),

        (AwaitingKeyFile, EventKind::Document(doc)) => Ok(Action::AcceptKey(doc.as_ref())),
        (AwaitingKeyFile, EventKind::Text(_)) => Err(BotError::MissingKeyFile),

        (AwaitingPassword, EventKind::Text(text)) => Ok(Action::AcceptPassword(text)),
        (AwaitingPassword, EventKind::Document(_)) => {
            Ok(Action::Ignore("Send the password as a text message."))
        }

        (CommandLoop, EventKind::Text(text)) => {
            let command = text.trim();
            if is_disconnect_sentinel(command) {
                Ok(Action::Close(CloseReason::Disconnect))
            } else if command.is_empty() {
                Ok(Action::Ignore("Send a command to run."))
            } else {
                Ok(Action::Run(command))
            }
        }
        (CommandLoop, EventKind::Document(_)) => {
            Ok(Action::Ignore("Files are not accepted here. Send a command as text."))
        }
    }
}

fn start_session(args: &[String]) -> Result<Target, BotError> {
    match args {
        [host, user] => Target::parse(host, user),
        _ => Err(BotError::InvalidArguments(format!(
            "expected <host> <user>, got {} argument(s)",
            args.len()
        ))),
    }
}

/// Recognise the auth method in a free-text choice.
///
/// Case-insensitive substring match; "key" wins over "password".
pub fn parse_auth_choice(text: &str) -> Option<AuthKind> {
    let lower = text.to_lowercase();
    if lower.contains("key") {
        Some(AuthKind::Key)
    } else if lower.contains("password") {
        Some(AuthKind::Password)
    } else {
        None
    }
}

/// Whether `text` asks to leave the command loop.
pub fn is_disconnect_sentinel(text: &str) -> bool {
    let text = text.trim();
    DISCONNECT_SENTINELS
        .iter()
        .any(|sentinel| text.eq_ignore_ascii_case(sentinel))
}
