//! Telegram adapter: Bot API client, update mapping and delivery loops.
//!
//! Updates arrive either through `getUpdates` long polling ([`polling`]) or
//! through a webhook served by poem ([`webhook`]). Both feed the same
//! [`Dispatcher`](crate::bot::dispatch::Dispatcher) after [`to_event`]
//! converts them into platform-neutral events.

pub mod api;
pub mod polling;
pub mod types;
pub mod webhook;

use async_trait::async_trait;
use tracing::debug;

pub use api::TelegramApi;

use self::types::{BotCommand, Document, KeyboardButton, ReplyMarkup, SendMessage, Update};
use crate::bot::error::TransportError;
use crate::bot::event::{Attachment, ChatTransport, EventKind, InboundEvent};
use crate::bot::types::{ChatId, Reply, ReplyFormat, ReplyKeyboard, UserId};

/// Largest key file accepted for download.
pub const MAX_KEY_FILE_BYTES: u64 = 64 * 1024;

/// Commands advertised in the client's command menu.
pub const BOT_COMMANDS: &[BotCommand] = &[
    BotCommand {
        command: "start",
        description: "Show usage",
    },
    BotCommand {
        command: "ssh_connect",
        description: "Start an SSH session: <host> <user>",
    },
    BotCommand {
        command: "ssh_disconnect",
        description: "Close the SSH session",
    },
    BotCommand {
        command: "cancel",
        description: "Abort the current step",
    },
];

/// [`ChatTransport`] that sends replies through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    api: TelegramApi,
}

impl TelegramTransport {
    pub fn new(api: TelegramApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send(&self, chat_id: ChatId, reply: Reply) -> Result<(), TransportError> {
        let message = SendMessage {
            chat_id: chat_id.0,
            text: &reply.text,
            parse_mode: match reply.format {
                ReplyFormat::Html => Some("HTML"),
                ReplyFormat::Plain => None,
            },
            reply_markup: reply.keyboard.map(reply_markup),
        };
        self.api.send_message(&message).await
    }
}

fn reply_markup(keyboard: ReplyKeyboard) -> ReplyMarkup {
    match keyboard {
        ReplyKeyboard::Choices(choices) => ReplyMarkup::Keyboard {
            keyboard: choices
                .into_iter()
                .map(|text| vec![KeyboardButton { text }])
                .collect(),
            one_time_keyboard: true,
            resize_keyboard: true,
        },
        ReplyKeyboard::Remove => ReplyMarkup::Remove {
            remove_keyboard: true,
        },
    }
}

/// A document attached to a Telegram message.
pub struct TelegramAttachment {
    api: TelegramApi,
    document: Document,
}

#[async_trait]
impl Attachment for TelegramAttachment {
    fn file_name(&self) -> Option<&str> {
        self.document.file_name.as_deref()
    }

    async fn fetch(&self) -> Result<Vec<u8>, TransportError> {
        if let Some(size) = self.document.file_size
            && size > MAX_KEY_FILE_BYTES
        {
            return Err(TransportError::Decode(format!(
                "file is too large ({} bytes)",
                size
            )));
        }

        let file = self.api.get_file(&self.document.file_id).await?;
        let path = file
            .file_path
            .ok_or_else(|| TransportError::Decode("file is not downloadable".to_string()))?;
        self.api.download(&path, MAX_KEY_FILE_BYTES).await
    }
}

/// Convert an update into an inbound event.
///
/// Updates without a message, a human sender, or usable content yield `None`.
pub fn to_event(update: Update, api: &TelegramApi) -> Option<InboundEvent> {
    let message = update.message?;
    let sender = message.from.filter(|user| !user.is_bot)?;
    let user_id = UserId(sender.id);
    let chat_id = ChatId(message.chat.id);

    let kind = if let Some(document) = message.document {
        EventKind::Document(Box::new(TelegramAttachment {
            api: api.clone(),
            document,
        }))
    } else if let Some(text) = message.text {
        EventKind::from_text(&text)
    } else {
        debug!("Skipping update {} without text or document", update.update_id);
        return None;
    };

    Some(InboundEvent::new(user_id, chat_id, kind))
}
