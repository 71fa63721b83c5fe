//! Per-user session state and the registry that owns it.
//!
//! Provides lock-free concurrent lookup of user sessions using `DashMap`.
//! Each session sits behind its own `tokio::sync::Mutex`, held for the whole
//! of one message-handling turn, so a user can never have two turns racing
//! on the same connection while different users never wait on each other.
//!
//! # Teardown
//!
//! [`UserSession::teardown`] is the single cleanup path: it closes the remote
//! connection and releases the credential material. Disconnect, cancel,
//! restart, reset on error, idle eviction and shutdown all end up there.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::ShellConnector;
use super::connection::RemoteConnection;
use super::credentials::CredentialMaterial;
use super::error::BotError;
use super::state::ConversationState;
use super::types::{ChatId, Target, UserId};

/// A session shared between the registry and the turn currently holding it.
pub type SharedSession = Arc<Mutex<UserSession>>;

/// Everything the bot knows about one user's SSH session.
pub struct UserSession {
    /// Correlates log lines for this session
    pub session_id: Uuid,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub target: Target,
    pub started_at: DateTime<Utc>,
    state: ConversationState,
    credentials: Option<CredentialMaterial>,
    connection: RemoteConnection,
    last_activity: DateTime<Utc>,
}

impl UserSession {
    pub fn new(
        user_id: UserId,
        chat_id: ChatId,
        target: Target,
        command_timeout: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            chat_id,
            target,
            started_at: now,
            state: ConversationState::AwaitingAuthChoice,
            credentials: None,
            connection: RemoteConnection::new(command_timeout),
            last_activity: now,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConversationState) {
        debug!(
            "Session {} moved {} -> {}",
            self.session_id, self.state, state
        );
        self.state = state;
    }

    pub fn credentials(&self) -> Option<&CredentialMaterial> {
        self.credentials.as_ref()
    }

    /// Attach credential material. Only the first call takes effect.
    ///
    /// A second material is released immediately and `false` is returned.
    pub fn set_credentials(&mut self, mut material: CredentialMaterial) -> bool {
        if self.credentials.is_some() {
            warn!(
                "Session {} already has credentials, discarding new {} material",
                self.session_id,
                material.kind()
            );
            material.release();
            return false;
        }
        self.credentials = Some(material);
        true
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_established()
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// How long the session has gone without a turn.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).to_std().unwrap_or_default()
    }

    /// Run a command, connecting first if needed.
    ///
    /// Connection failures are returned as errors; execution failures are
    /// already folded into the returned text.
    pub async fn run(
        &mut self,
        connector: &dyn ShellConnector,
        command: &str,
    ) -> Result<String, BotError> {
        let credentials = self.credentials.as_ref().ok_or(BotError::NoActiveSession)?;
        self.connection
            .ensure_connected(connector, &self.target, credentials)
            .await?;
        Ok(self.connection.execute(command).await)
    }

    /// Close the connection and release credentials. Idempotent.
    pub async fn teardown(&mut self) {
        if self.state == ConversationState::Closed {
            return;
        }
        self.connection.close().await;
        if let Some(material) = self.credentials.as_mut() {
            material.release();
        }
        self.state = ConversationState::Closed;
        info!(
            "Session {} for user {} ({}) torn down",
            self.session_id, self.user_id, self.target
        );
    }
}

/// Owner of every live [`UserSession`], keyed by user.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, SharedSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, returning the one it replaced.
    pub fn insert(&self, session: UserSession) -> Option<SharedSession> {
        let user_id = session.user_id;
        self.sessions
            .insert(user_id, Arc::new(Mutex::new(session)))
    }

    pub fn get(&self, user_id: UserId) -> Option<SharedSession> {
        self.sessions.get(&user_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, user_id: UserId) -> Option<SharedSession> {
        self.sessions.remove(&user_id).map(|(_, session)| session)
    }

    /// Remove `user_id`'s entry only if it still is `session`.
    pub fn detach(&self, user_id: UserId, session: &SharedSession) -> bool {
        self.sessions
            .remove_if(&user_id, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove and tear down a user's session.
    ///
    /// Waits for any in-flight turn on that session to finish first.
    pub async fn teardown(&self, user_id: UserId) -> bool {
        match self.remove(user_id) {
            Some(session) => {
                session.lock().await.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Tear down sessions idle for longer than `max_idle`.
    ///
    /// Sessions locked by an in-flight turn are active by definition and
    /// are skipped.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<UserId> {
        let now = Utc::now();
        let snapshot: Vec<(UserId, SharedSession)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut evicted = Vec::new();
        for (user_id, shared) in snapshot {
            let Ok(mut session) = shared.try_lock() else {
                continue;
            };
            if session.idle_for(now) <= max_idle {
                continue;
            }
            if self.detach(user_id, &shared) {
                info!(
                    "Evicting session {} for user {} after {:?} idle",
                    session.session_id,
                    user_id,
                    session.idle_for(now)
                );
                session.teardown().await;
                evicted.push(user_id);
            }
        }
        evicted
    }

    /// Tear down every session concurrently. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let user_ids: Vec<UserId> = self.sessions.iter().map(|e| *e.key()).collect();
        let sessions: Vec<SharedSession> = user_ids
            .into_iter()
            .filter_map(|user_id| self.remove(user_id))
            .collect();

        let count = sessions.len();
        join_all(sessions.into_iter().map(|shared| async move {
            shared.lock().await.teardown().await;
        }))
        .await;

        if count > 0 {
            info!("Closed {} session(s) on shutdown", count);
        }
        count
    }
}
