//! Chat-driven SSH bot.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Identifiers, remote targets and reply values
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Turn, transport and configuration errors
//! - `event`: Inbound events and the chat transport seam
//! - `state`: Conversation state machine (pure transitions)
//! - `machine`: Turn executor owning the session registry
//! - `registry`: Per-user sessions and their lifecycle
//! - `credentials`: Key files and passwords supplied by users
//! - `auth`: SSH authentication strategies
//! - `session`: russh client handler and host key policy
//! - `client`: SSH connection and command execution
//! - `connection`: Lazily established connection per session
//! - `format`: Output truncation and HTML rendering
//! - `dispatch`: Ordered per-user lanes and the idle reaper
//! - `telegram`: Bot API adapter (long polling or webhook)

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod format;
pub mod machine;
pub mod registry;
pub mod session;
pub mod state;
pub mod telegram;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use config::{AccessList, BotConfig, Delivery, TelegramConfig};
pub use dispatch::{Dispatcher, reap_period, spawn_idle_reaper};
pub use error::{BotError, ConfigError, TransportError};
pub use event::{Attachment, ChatTransport, EventKind, InboundEvent};
pub use machine::{Bot, TurnOutcome};
pub use state::ConversationState;
