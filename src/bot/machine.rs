//! Turn executor for the conversation state machine.
//!
//! [`Bot::handle`] runs one user turn: it checks the allow-list, locks the
//! user's session, asks [`transition`] what the event means and performs the
//! resulting [`Action`] against the registry, the credential store and the
//! remote connection. Replies go out through a [`ChatTransport`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::client::ShellConnector;
use super::config::{AccessList, BotConfig};
use super::credentials::{CredentialStore, extension_of};
use super::error::BotError;
use super::event::{Attachment, ChatTransport, EventKind, InboundEvent};
use super::format::{code, format_command_result, prompt};
use super::registry::{SessionRegistry, SharedSession, UserSession};
use super::state::{Action, CloseReason, ConversationState, transition};
use super::types::{AuthKind, ChatId, Reply, ReplyKeyboard, Target, UserId};

const HELP_TEXT: &str =
    "I am an SSH bot.\nTo start, send:\n<code>/ssh_connect &lt;host&gt; &lt;user&gt;</code>";
const RESTART_HINT: &str = "To start again, send:\n/ssh_connect <host> <user>";
const ACCESS_DENIED: &str = "Sorry, you are not allowed to use this bot.";
const NO_SESSION: &str = "There is no active SSH session.";

/// Reply-keyboard choices offered after a session starts.
pub const AUTH_CHOICES: [&str; 2] = ["🔑 key", "🔒 password"];

/// Result of one handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// State the user is in once the turn completed
    pub state: ConversationState,
    /// Error raised during the turn, whether or not it reset the conversation
    pub error: Option<BotError>,
    /// The sender is not on the allow-list
    pub denied: bool,
}

impl TurnOutcome {
    fn new(state: ConversationState) -> Self {
        Self {
            state,
            error: None,
            denied: false,
        }
    }

    fn failed(state: ConversationState, error: BotError) -> Self {
        Self {
            state,
            error: Some(error),
            denied: false,
        }
    }

    fn denied() -> Self {
        Self {
            state: ConversationState::Idle,
            error: None,
            denied: true,
        }
    }
}

/// Root of the bot: owns the session registry and everything a turn needs.
pub struct Bot {
    registry: Arc<SessionRegistry>,
    store: CredentialStore,
    connector: Arc<dyn ShellConnector>,
    access: AccessList,
    command_timeout: Option<Duration>,
}

impl Bot {
    pub fn new(config: &BotConfig, connector: Arc<dyn ShellConnector>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            store: CredentialStore::new(config.key_dir.clone()),
            connector,
            access: config.access.clone(),
            command_timeout: config.command_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn is_authorized(&self, user_id: UserId) -> bool {
        self.access.allows(user_id)
    }

    /// Handle one inbound event to completion.
    ///
    /// Never fails: errors are reported to the user and recorded in the
    /// returned [`TurnOutcome`].
    pub async fn handle(&self, event: InboundEvent, transport: &dyn ChatTransport) -> TurnOutcome {
        let InboundEvent {
            user_id,
            chat_id,
            kind,
        } = event;

        if !self.is_authorized(user_id) {
            debug!("Ignoring {} from unauthorized user {}", kind.label(), user_id);
            if matches!(kind, EventKind::Help) {
                self.reply(transport, chat_id, Reply::plain(ACCESS_DENIED))
                    .await;
            }
            return TurnOutcome::denied();
        }

        let shared = self.registry.get(user_id);
        let mut guard = match &shared {
            Some(session) => Some(session.lock().await),
            None => None,
        };
        let state = guard
            .as_ref()
            .map(|session| session.state())
            .unwrap_or(ConversationState::Idle);

        debug!("User {} sent {} in state {}", user_id, kind.label(), state);

        let result = match transition(state, &kind) {
            Ok(Action::Help) => {
                self.reply(transport, chat_id, Reply::html(HELP_TEXT)).await;
                Ok(TurnOutcome::new(state))
            }
            Ok(Action::NothingToClose) => {
                self.reply(
                    transport,
                    chat_id,
                    Reply::plain(NO_SESSION).with_keyboard(ReplyKeyboard::Remove),
                )
                .await;
                Ok(TurnOutcome::new(ConversationState::Idle))
            }
            Ok(Action::Ignore(hint)) => {
                self.reply(transport, chat_id, Reply::plain(hint)).await;
                Ok(TurnOutcome::new(state))
            }
            Ok(Action::Begin(target)) => {
                self.begin(
                    user_id,
                    chat_id,
                    target,
                    shared.as_ref(),
                    guard.as_deref_mut(),
                    transport,
                )
                .await
            }
            Ok(action) => match (shared.as_ref(), guard.as_deref_mut()) {
                (Some(shared), Some(session)) => {
                    self.advance(action, session, shared, transport).await
                }
                _ => Err(BotError::NoActiveSession),
            },
            Err(err) => Err(err),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.reset(
                    user_id,
                    chat_id,
                    err,
                    shared.as_ref(),
                    guard.as_deref_mut(),
                    transport,
                )
                .await
            }
        };

        if let Some(session) = guard.as_deref_mut()
            && session.state().is_active()
        {
            session.touch();
        }
        outcome
    }

    /// Start a new session, tearing down the current one first.
    async fn begin(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        target: Target,
        shared: Option<&SharedSession>,
        current: Option<&mut UserSession>,
        transport: &dyn ChatTransport,
    ) -> Result<TurnOutcome, BotError> {
        if let (Some(shared), Some(current)) = (shared, current) {
            self.registry.detach(user_id, shared);
            current.teardown().await;
        }

        let session = UserSession::new(user_id, chat_id, target, self.command_timeout);
        info!(
            "User {} started session {} for {}",
            user_id, session.session_id, session.target
        );
        self.registry.insert(session);

        let choices = AUTH_CHOICES.iter().map(|c| c.to_string()).collect();
        self.reply(
            transport,
            chat_id,
            Reply::plain("Choose an authentication method:")
                .with_keyboard(ReplyKeyboard::Choices(choices)),
        )
        .await;
        Ok(TurnOutcome::new(ConversationState::AwaitingAuthChoice))
    }

    /// Perform an action that operates on an existing session.
    async fn advance(
        &self,
        action: Action<'_>,
        session: &mut UserSession,
        shared: &SharedSession,
        transport: &dyn ChatTransport,
    ) -> Result<TurnOutcome, BotError> {
        let chat_id = session.chat_id;

        match action {
            Action::ChooseAuth(AuthKind::Key) => {
                session.set_state(ConversationState::AwaitingKeyFile);
                self.reply(
                    transport,
                    chat_id,
                    Reply::plain("🔑 Send your private SSH key as a file.")
                        .with_keyboard(ReplyKeyboard::Remove),
                )
                .await;
                Ok(TurnOutcome::new(ConversationState::AwaitingKeyFile))
            }
            Action::ChooseAuth(AuthKind::Password) => {
                session.set_state(ConversationState::AwaitingPassword);
                self.reply(
                    transport,
                    chat_id,
                    Reply::plain("🔒 Send your password as a text message.")
                        .with_keyboard(ReplyKeyboard::Remove),
                )
                .await;
                Ok(TurnOutcome::new(ConversationState::AwaitingPassword))
            }
            Action::AcceptKey(document) => {
                self.accept_key(session, document).await?;
                self.reply(
                    transport,
                    chat_id,
                    Reply::plain("Key file received.\nNow send a command to run:"),
                )
                .await;
                Ok(TurnOutcome::new(ConversationState::CommandLoop))
            }
            Action::AcceptPassword(secret) => {
                let material = self.store.store_password(session.user_id, secret);
                session.set_credentials(material);
                session.set_state(ConversationState::CommandLoop);
                self.reply(
                    transport,
                    chat_id,
                    Reply::plain("Password received. Now send a command to run:"),
                )
                .await;
                Ok(TurnOutcome::new(ConversationState::CommandLoop))
            }
            Action::Run(command) => self.run(session, command, transport).await,
            Action::Close(reason) => {
                self.registry.detach(session.user_id, shared);
                session.teardown().await;
                let text = match reason {
                    CloseReason::Disconnect => "🔌 SSH session closed",
                    CloseReason::Cancel => "Cancelled",
                };
                self.reply(
                    transport,
                    chat_id,
                    Reply::plain(text).with_keyboard(ReplyKeyboard::Remove),
                )
                .await;
                Ok(TurnOutcome::new(ConversationState::Closed))
            }
            Action::Help | Action::Begin(_) | Action::NothingToClose | Action::Ignore(_) => {
                Ok(TurnOutcome::new(session.state()))
            }
        }
    }

    async fn accept_key(
        &self,
        session: &mut UserSession,
        document: &dyn Attachment,
    ) -> Result<(), BotError> {
        let bytes = document
            .fetch()
            .await
            .map_err(|e| BotError::KeyFileUnavailable(e.to_string()))?;
        let extension = document.file_name().and_then(extension_of);
        let material = self
            .store
            .store_key(session.user_id, &bytes, extension.as_deref())?;

        session.set_credentials(material);
        session.set_state(ConversationState::CommandLoop);
        Ok(())
    }

    async fn run(
        &self,
        session: &mut UserSession,
        command: &str,
        transport: &dyn ChatTransport,
    ) -> Result<TurnOutcome, BotError> {
        let chat_id = session.chat_id;
        self.reply(
            transport,
            chat_id,
            Reply::html(format!("Executing {}...", code(command))),
        )
        .await;

        match session.run(self.connector.as_ref(), command).await {
            Ok(output) => {
                let prompt = prompt(&session.target.username, &session.target.address);
                self.reply(
                    transport,
                    chat_id,
                    Reply::html(format_command_result(&prompt, command, &output)),
                )
                .await;
                Ok(TurnOutcome::new(ConversationState::CommandLoop))
            }
            Err(err) if !err.resets_conversation() => {
                warn!(
                    "Session {} could not reach {}: {}",
                    session.session_id, session.target, err
                );
                self.reply(transport, chat_id, Reply::plain(format!("Error: {}", err)))
                    .await;
                Ok(TurnOutcome::failed(ConversationState::CommandLoop, err))
            }
            Err(err) => Err(err),
        }
    }

    /// Tear down whatever the user had, report `err` and return to idle.
    async fn reset(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        err: BotError,
        shared: Option<&SharedSession>,
        session: Option<&mut UserSession>,
        transport: &dyn ChatTransport,
    ) -> TurnOutcome {
        info!("Resetting conversation for user {}: {}", user_id, err);
        if let (Some(shared), Some(session)) = (shared, session) {
            self.registry.detach(user_id, shared);
            session.teardown().await;
        }

        self.reply(
            transport,
            chat_id,
            Reply::plain(format!("Error: {}", err)).with_keyboard(ReplyKeyboard::Remove),
        )
        .await;
        self.reply(transport, chat_id, Reply::plain(RESTART_HINT))
            .await;
        TurnOutcome::failed(ConversationState::Idle, err)
    }

    async fn reply(&self, transport: &dyn ChatTransport, chat_id: ChatId, reply: Reply) {
        if let Err(e) = transport.send(chat_id, reply).await {
            warn!("Failed to send reply to chat {}: {}", chat_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::client::SshSettings;
    use crate::bot::test_utils::{MemoryAttachment, RecordingTransport, StubConnector, StubReply};
    use crate::bot::types::ReplyFormat;
    use ConversationState::*;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);
    const MALLORY: UserId = UserId(666);

    struct Harness {
        bot: Bot,
        connector: StubConnector,
        transport: RecordingTransport,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let connector = StubConnector::new();
            let config = BotConfig {
                access: AccessList::new([ALICE, BOB]),
                ssh: SshSettings {
                    connect_timeout: Duration::from_secs(5),
                    compress: true,
                    host_key_policy: Default::default(),
                },
                command_timeout: None,
                idle_timeout: None,
                key_dir: Some(dir.path().to_path_buf()),
            };
            Self {
                bot: Bot::new(&config, Arc::new(connector.clone())),
                connector,
                transport: RecordingTransport::new(),
                _dir: dir,
            }
        }

        async fn send(&self, user: UserId, kind: EventKind) -> TurnOutcome {
            let event = InboundEvent::new(user, ChatId(user.0), kind);
            self.bot.handle(event, &self.transport).await
        }

        async fn text(&self, user: UserId, text: &str) -> TurnOutcome {
            self.send(user, EventKind::from_text(text)).await
        }

        async fn key(&self, user: UserId, name: &str, bytes: &[u8]) -> TurnOutcome {
            self.send(
                user,
                EventKind::Document(Box::new(MemoryAttachment::new(name, bytes))),
            )
            .await
        }

        fn last(&self, user: UserId) -> String {
            self.transport.last_text(ChatId(user.0)).unwrap_or_default()
        }

        fn key_path(&self, user: UserId) -> Option<std::path::PathBuf> {
            let shared = self.bot.registry().get(user)?;
            let session = shared.try_lock().ok()?;
            session
                .credentials()
                .and_then(|c| c.key_path())
                .map(|p| p.to_path_buf())
        }
    }

    mod key_flow {
        use super::*;

        #[tokio::test]
        async fn test_end_to_end_key_session() {
            let h = Harness::new();
            h.connector.reply("echo hi", StubReply::output("hi\n", ""));

            assert_eq!(
                h.text(ALICE, "/ssh_connect 10.0.0.5 alice").await.state,
                AwaitingAuthChoice
            );
            let choice = h.transport.replies_for(ChatId(1)).pop().unwrap();
            assert_eq!(
                choice.keyboard,
                Some(ReplyKeyboard::Choices(vec![
                    "🔑 key".to_string(),
                    "🔒 password".to_string()
                ]))
            );

            assert_eq!(h.text(ALICE, "🔑 key").await.state, AwaitingKeyFile);
            assert_eq!(
                h.key(ALICE, "id_ed25519.pem", b"PRIVATEKEY").await.state,
                CommandLoop
            );

            let key_path = h.key_path(ALICE).unwrap();
            assert_eq!(std::fs::read(&key_path).unwrap(), b"PRIVATEKEY");
            assert_eq!(key_path.extension().unwrap(), "pem");

            let outcome = h.text(ALICE, "echo hi").await;
            assert_eq!(outcome.state, CommandLoop);
            assert!(outcome.error.is_none());

            let replies = h.transport.replies_for(ChatId(1));
            let result = replies.last().unwrap();
            assert_eq!(result.format, ReplyFormat::Html);
            assert_eq!(result.text, "<pre>alice@10.0.0.5:$ echo hi\nhi\n</pre>");
            let notice = &replies[replies.len() - 2];
            assert_eq!(notice.text, "Executing <code>echo hi</code>...");

            let connects = h.connector.connects();
            assert_eq!(connects.len(), 1);
            assert_eq!(connects[0].kind, AuthKind::Key);
            assert_eq!(connects[0].key_bytes.as_deref(), Some(&b"PRIVATEKEY"[..]));
            assert_eq!(connects[0].target.port, 22);
        }

        #[tokio::test]
        async fn test_connection_is_reused_across_commands() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;
            h.text(ALICE, "key").await;
            h.key(ALICE, "id_rsa", b"K").await;

            h.text(ALICE, "uptime").await;
            h.text(ALICE, "whoami").await;

            assert_eq!(h.connector.connect_count(), 1);
            assert_eq!(h.connector.executed(), vec!["uptime", "whoami"]);
        }

        #[tokio::test]
        async fn test_text_instead_of_key_resets() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;
            h.text(ALICE, "key").await;

            let outcome = h.text(ALICE, "here is my key").await;
            assert_eq!(outcome.state, Idle);
            assert_eq!(outcome.error, Some(BotError::MissingKeyFile));
            assert!(!h.bot.registry().contains(ALICE));
            assert!(h.last(ALICE).contains("/ssh_connect"));
        }

        #[tokio::test]
        async fn test_download_failure_resets() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;
            h.text(ALICE, "key").await;

            let doc = MemoryAttachment::failing("id_rsa", "file is too big");
            let outcome = h.send(ALICE, EventKind::Document(Box::new(doc))).await;
            assert_eq!(outcome.state, Idle);
            assert!(matches!(
                outcome.error,
                Some(BotError::KeyFileUnavailable(_))
            ));
            assert!(!h.bot.registry().contains(ALICE));
        }
    }

    mod password_flow {
        use super::*;

        #[tokio::test]
        async fn test_password_taken_verbatim() {
            let h = Harness::new();
            h.connector.reply("id", StubReply::output("uid=0\n", ""));

            h.text(ALICE, "/ssh_connect 10.0.0.5:2222 root").await;
            assert_eq!(h.text(ALICE, "🔒 password").await.state, AwaitingPassword);
            assert_eq!(h.text(ALICE, " s3cret ").await.state, CommandLoop);
            h.text(ALICE, "id").await;

            let connects = h.connector.connects();
            assert_eq!(connects[0].kind, AuthKind::Password);
            assert_eq!(connects[0].target.port, 2222);
            assert_eq!(
                h.last(ALICE),
                "<pre>root@10.0.0.5:2222:$ id\nuid=0\n</pre>"
            );
        }

        #[tokio::test]
        async fn test_unrecognized_choice_resets() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;

            let outcome = h.text(ALICE, "certificate").await;
            assert_eq!(outcome.state, Idle);
            assert_eq!(outcome.error, Some(BotError::UnrecognizedChoice));
            assert!(!h.bot.registry().contains(ALICE));
        }
    }

    mod command_loop {
        use super::*;

        async fn connected(h: &Harness, user: UserId, host: &str) {
            h.text(user, &format!("/ssh_connect {} u{}", host, user.0))
                .await;
            h.text(user, "password").await;
            h.text(user, "pw").await;
        }

        #[tokio::test]
        async fn test_exit_tears_down_then_no_session() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;
            h.text(ALICE, "key").await;
            h.key(ALICE, "id_rsa", b"K").await;
            h.text(ALICE, "ls").await;
            let key_path = h.key_path(ALICE).unwrap();

            let outcome = h.text(ALICE, "/exit").await;
            assert_eq!(outcome.state, Closed);
            assert_eq!(h.last(ALICE), "🔌 SSH session closed");
            assert!(!key_path.exists());
            assert_eq!(h.connector.close_count(), 1);
            assert!(!h.bot.registry().contains(ALICE));

            let outcome = h.text(ALICE, "ls").await;
            assert_eq!(outcome.state, Idle);
            assert_eq!(outcome.error, Some(BotError::NoActiveSession));
        }

        #[tokio::test]
        async fn test_execution_error_stays_in_loop() {
            let h = Harness::new();
            h.connector
                .reply("boom", StubReply::Fail("channel rejected".to_string()));
            connected(&h, ALICE, "host").await;

            let outcome = h.text(ALICE, "boom").await;
            assert_eq!(outcome.state, CommandLoop);
            assert!(h.last(ALICE).contains("Error: channel rejected"));
        }

        #[tokio::test]
        async fn test_connect_failure_keeps_session_and_retries() {
            let h = Harness::new();
            connected(&h, ALICE, "host").await;

            h.connector
                .fail_connect(BotError::NetworkError("connection refused".to_string()));
            let outcome = h.text(ALICE, "ls").await;
            assert_eq!(outcome.state, CommandLoop);
            assert!(matches!(outcome.error, Some(BotError::NetworkError(_))));
            assert!(h.last(ALICE).starts_with("Error: connection failed"));
            assert!(h.bot.registry().contains(ALICE));

            h.connector.allow_connect();
            let outcome = h.text(ALICE, "ls").await;
            assert!(outcome.error.is_none());
            assert_eq!(h.connector.connect_count(), 1);
        }

        #[tokio::test]
        async fn test_markup_in_output_is_escaped() {
            let h = Harness::new();
            h.connector
                .reply("cat page", StubReply::output("<b>hi</b>", ""));
            connected(&h, ALICE, "host").await;

            h.text(ALICE, "cat page").await;
            assert!(h.last(ALICE).contains("&lt;b&gt;hi&lt;/b&gt;"));
        }

        #[tokio::test]
        async fn test_document_in_loop_is_ignored() {
            let h = Harness::new();
            connected(&h, ALICE, "host").await;

            let outcome = h.key(ALICE, "notes.txt", b"x").await;
            assert_eq!(outcome.state, CommandLoop);
            assert!(outcome.error.is_none());
            assert!(h.connector.executed().is_empty());
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_malformed_start_leaves_no_session() {
            let h = Harness::new();
            for text in ["/ssh_connect", "/ssh_connect host", "/ssh_connect a b c"] {
                let outcome = h.text(ALICE, text).await;
                assert_eq!(outcome.state, Idle);
                assert!(matches!(
                    outcome.error,
                    Some(BotError::InvalidArguments(_))
                ));
            }
            assert!(!h.bot.registry().contains(ALICE));
        }

        #[tokio::test]
        async fn test_malformed_restart_tears_down_existing() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;
            h.text(ALICE, "password").await;
            h.text(ALICE, "pw").await;
            h.text(ALICE, "ls").await;

            let outcome = h.text(ALICE, "/ssh_connect only-host").await;
            assert_eq!(outcome.state, Idle);
            assert!(!h.bot.registry().contains(ALICE));
            assert_eq!(h.connector.close_count(), 1);
        }

        #[tokio::test]
        async fn test_restart_replaces_session() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect old alice").await;
            h.text(ALICE, "password").await;
            h.text(ALICE, "pw").await;
            h.text(ALICE, "ls").await;

            let outcome = h.text(ALICE, "/ssh_connect new alice").await;
            assert_eq!(outcome.state, AwaitingAuthChoice);
            assert_eq!(h.connector.close_count(), 1);

            let shared = h.bot.registry().get(ALICE).unwrap();
            let session = shared.lock().await;
            assert_eq!(session.target.host, "new");
            assert!(session.credentials().is_none());
        }

        #[tokio::test]
        async fn test_cancel_from_every_active_state() {
            let h = Harness::new();
            let setups: [&[&str]; 3] = [&[], &["key"], &["password"]];
            for steps in setups {
                h.text(ALICE, "/ssh_connect host alice").await;
                for step in steps {
                    h.text(ALICE, step).await;
                }
                let outcome = h.text(ALICE, "/cancel").await;
                assert_eq!(outcome.state, Closed);
                assert_eq!(h.last(ALICE), "Cancelled");
                assert!(!h.bot.registry().contains(ALICE));
            }
        }

        #[tokio::test]
        async fn test_disconnect_while_idle() {
            let h = Harness::new();
            let outcome = h.text(ALICE, "/ssh_disconnect").await;
            assert_eq!(outcome.state, Idle);
            assert!(outcome.error.is_none());
            assert_eq!(h.last(ALICE), NO_SESSION);
        }

        #[tokio::test]
        async fn test_help_keeps_state() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;
            let outcome = h.text(ALICE, "/start").await;
            assert_eq!(outcome.state, AwaitingAuthChoice);
            assert!(h.last(ALICE).contains("/ssh_connect"));
        }

        #[tokio::test]
        async fn test_evicted_session_is_no_session() {
            let h = Harness::new();
            h.text(ALICE, "/ssh_connect host alice").await;
            h.text(ALICE, "password").await;
            h.text(ALICE, "pw").await;

            h.bot.registry().teardown(ALICE).await;
            let outcome = h.text(ALICE, "ls").await;
            assert_eq!(outcome.error, Some(BotError::NoActiveSession));
        }
    }

    mod access {
        use super::*;

        #[tokio::test]
        async fn test_unauthorized_start_is_denied() {
            let h = Harness::new();
            let outcome = h.text(MALLORY, "/start").await;
            assert!(outcome.denied);
            assert_eq!(h.last(MALLORY), ACCESS_DENIED);
        }

        #[tokio::test]
        async fn test_unauthorized_other_events_are_silent() {
            let h = Harness::new();
            let outcome = h.text(MALLORY, "/ssh_connect host root").await;
            assert!(outcome.denied);
            assert_eq!(h.transport.count(), 0);
            assert!(h.bot.registry().is_empty());
        }
    }

    mod isolation {
        use super::*;

        #[tokio::test]
        async fn test_two_users_interleaved() {
            let h = Arc::new(Harness::new());
            h.connector.reply(
                "whoami",
                StubReply::Delayed(Duration::from_millis(20), Box::new(StubReply::Whoami)),
            );

            h.text(ALICE, "/ssh_connect alpha alice").await;
            h.text(BOB, "/ssh_connect beta bob").await;
            h.text(ALICE, "password").await;
            h.text(BOB, "key").await;
            h.text(ALICE, "pw-a").await;
            h.key(BOB, "id_rsa", b"BOBKEY").await;

            let (a, b) = tokio::join!(h.text(ALICE, "whoami"), h.text(BOB, "whoami"));
            assert_eq!(a.state, CommandLoop);
            assert_eq!(b.state, CommandLoop);

            assert!(h.last(ALICE).contains("alice@alpha\n"));
            assert!(h.last(BOB).contains("bob@beta\n"));
            assert!(!h.last(ALICE).contains("bob"));

            h.text(ALICE, "/exit").await;
            assert!(!h.bot.registry().contains(ALICE));
            assert!(h.bot.registry().contains(BOB));
            assert_eq!(h.text(BOB, "whoami").await.state, CommandLoop);
        }
    }
}
