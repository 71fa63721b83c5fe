#![deny(warnings)]
#![deny(clippy::unwrap_used)]

//! Local console front end: drives the bot from stdin as a single user.
//!
//! Lines are handled exactly like chat messages. `/key <path>` uploads a
//! local private key file when the bot asks for one.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use tg_ssh_bot::bot::client::RusshConnector;
use tg_ssh_bot::bot::types::{ChatId, Reply, ReplyFormat, ReplyKeyboard, UserId};
use tg_ssh_bot::bot::{
    AccessList, Attachment, Bot, BotConfig, ChatTransport, EventKind, InboundEvent,
    TransportError,
};

const CONSOLE_USER: UserId = UserId(0);
const CONSOLE_CHAT: ChatId = ChatId(0);

struct ConsoleTransport;

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send(&self, _chat_id: ChatId, reply: Reply) -> Result<(), TransportError> {
        let text = match reply.format {
            ReplyFormat::Html => strip_html(&reply.text),
            ReplyFormat::Plain => reply.text,
        };
        println!("{}", text);
        if let Some(ReplyKeyboard::Choices(choices)) = reply.keyboard {
            println!("[{}]", choices.join(" | "));
        }
        Ok(())
    }
}

struct FileAttachment {
    path: PathBuf,
}

#[async_trait]
impl Attachment for FileAttachment {
    fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    async fn fetch(&self) -> Result<Vec<u8>, TransportError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

fn strip_html(text: &str) -> String {
    ["<pre>", "</pre>", "<code>", "</code>"]
        .iter()
        .fold(text.to_string(), |acc, tag| acc.replace(tag, ""))
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn to_event(line: &str) -> EventKind {
    match line.trim().strip_prefix("/key ") {
        Some(path) => EventKind::Document(Box::new(FileAttachment {
            path: PathBuf::from(path.trim()),
        })),
        None => EventKind::from_text(line),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Logs go to stderr so stdout stays a clean transcript
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warn".parse().expect("valid directive")),
        )
        .init();

    let mut config = BotConfig::from_env()?;
    config.access = AccessList::new([CONSOLE_USER]);

    let bot = Bot::new(&config, Arc::new(RusshConnector::new(config.ssh)));
    let transport = ConsoleTransport;

    println!("SSH bot console. Start with /ssh_connect <host> <user>, Ctrl-D to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let event = InboundEvent::new(CONSOLE_USER, CONSOLE_CHAT, to_event(&line));
        bot.handle(event, &transport).await;
    }

    let closed = bot.registry().shutdown().await;
    info!("Console closed, {} session(s) torn down", closed);
    Ok(())
}
