//! Test doubles for the SSH and chat seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::client::{ShellConnector, ShellSession};
use super::credentials::CredentialMaterial;
use super::error::{BotError, TransportError};
use super::event::{Attachment, ChatTransport};
use super::types::{AuthKind, ChatId, CommandOutput, Reply, Target};

/// Canned behaviour for one command.
#[derive(Debug, Clone)]
pub enum StubReply {
    Output { stdout: String, stderr: String },
    /// Prints `user@host` of the connection that ran it
    Whoami,
    Fail(String),
    Delayed(Duration, Box<StubReply>),
}

impl StubReply {
    pub fn output(stdout: &str, stderr: &str) -> Self {
        StubReply::Output {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// What the stub saw on one connect call.
#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub target: Target,
    pub kind: AuthKind,
    /// Contents of the key file at connect time
    pub key_bytes: Option<Vec<u8>>,
}

#[derive(Default)]
struct StubState {
    replies: Mutex<HashMap<String, StubReply>>,
    connect_error: Mutex<Option<BotError>>,
    connects: Mutex<Vec<ConnectRecord>>,
    executed: Mutex<Vec<String>>,
    closes: AtomicUsize,
    alive: Mutex<Vec<Arc<AtomicBool>>>,
}

/// In-memory [`ShellConnector`] with scripted command replies.
#[derive(Clone, Default)]
pub struct StubConnector {
    state: Arc<StubState>,
}

impl StubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, command: &str, reply: StubReply) {
        self.state
            .replies
            .lock()
            .unwrap()
            .insert(command.to_string(), reply);
    }

    pub fn fail_connect(&self, error: BotError) {
        *self.state.connect_error.lock().unwrap() = Some(error);
    }

    pub fn allow_connect(&self) {
        *self.state.connect_error.lock().unwrap() = None;
    }

    /// Mark every open connection as lost.
    pub fn drop_connections(&self) {
        for alive in self.state.alive.lock().unwrap().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.lock().unwrap().len()
    }

    pub fn connects(&self) -> Vec<ConnectRecord> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellConnector for StubConnector {
    async fn connect(
        &self,
        target: &Target,
        credentials: &CredentialMaterial,
    ) -> Result<Box<dyn ShellSession>, BotError> {
        if let Some(err) = self.state.connect_error.lock().unwrap().clone() {
            return Err(err);
        }

        self.state.connects.lock().unwrap().push(ConnectRecord {
            target: target.clone(),
            kind: credentials.kind(),
            key_bytes: credentials.key_path().and_then(|p| std::fs::read(p).ok()),
        });

        let alive = Arc::new(AtomicBool::new(true));
        self.state.alive.lock().unwrap().push(alive.clone());

        Ok(Box::new(StubSession {
            state: self.state.clone(),
            target: target.clone(),
            alive,
        }))
    }
}

struct StubSession {
    state: Arc<StubState>,
    target: Target,
    alive: Arc<AtomicBool>,
}

impl StubSession {
    fn render(&self, reply: StubReply) -> futures::future::BoxFuture<'_, Result<CommandOutput, String>> {
        Box::pin(async move {
            match reply {
                StubReply::Output { stdout, stderr } => Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: 0,
                    timed_out: false,
                }),
                StubReply::Whoami => Ok(CommandOutput {
                    stdout: format!("{}@{}\n", self.target.username, self.target.host),
                    ..Default::default()
                }),
                StubReply::Fail(message) => Err(message),
                StubReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    self.render(*inner).await
                }
            }
        })
    }
}

#[async_trait]
impl ShellSession for StubSession {
    async fn exec(
        &self,
        command: &str,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, String> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err("connection closed".to_string());
        }
        self.state.executed.lock().unwrap().push(command.to_string());

        let reply = self
            .state
            .replies
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| StubReply::output("", ""));
        self.render(reply).await
    }

    fn is_closed(&self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`ChatTransport`] that records every reply.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ChatId, Reply)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies_for(&self, chat: ChatId) -> Vec<Reply> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn last_text(&self, chat: ChatId) -> Option<String> {
        self.replies_for(chat).last().map(|r| r.text.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, chat_id: ChatId, reply: Reply) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((chat_id, reply));
        Ok(())
    }
}

/// Attachment served from memory.
pub struct MemoryAttachment {
    name: Option<String>,
    bytes: Result<Vec<u8>, String>,
}

impl MemoryAttachment {
    pub fn new(name: &str, bytes: &[u8]) -> Self {
        Self {
            name: Some(name.to_string()),
            bytes: Ok(bytes.to_vec()),
        }
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            bytes: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl Attachment for MemoryAttachment {
    fn file_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn fetch(&self) -> Result<Vec<u8>, TransportError> {
        self.bytes.clone().map_err(TransportError::Http)
    }
}
