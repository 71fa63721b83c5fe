//! Per-user ordered dispatch and background session maintenance.
//!
//! Every allow-listed user gets a lane: an unbounded channel drained by one
//! task, so a user's messages are handled strictly in arrival order while
//! different users run concurrently. Lanes are created on first contact and
//! are therefore bounded by the allow-list.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::event::{ChatTransport, InboundEvent};
use super::machine::Bot;
use super::registry::SessionRegistry;
use super::types::UserId;

/// Routes inbound events to per-user lanes.
pub struct Dispatcher {
    bot: Arc<Bot>,
    transport: Arc<dyn ChatTransport>,
    lanes: DashMap<UserId, mpsc::UnboundedSender<InboundEvent>>,
}

impl Dispatcher {
    pub fn new(bot: Arc<Bot>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            bot,
            transport,
            lanes: DashMap::new(),
        }
    }

    pub fn bot(&self) -> &Arc<Bot> {
        &self.bot
    }

    /// Number of live user lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Queue an event for handling. Returns immediately.
    pub fn submit(&self, event: InboundEvent) {
        let user_id = event.user_id;

        if !self.bot.is_authorized(user_id) {
            // No lane for strangers; the bot only logs or denies.
            let bot = self.bot.clone();
            let transport = self.transport.clone();
            tokio::spawn(async move {
                bot.handle(event, transport.as_ref()).await;
            });
            return;
        }

        let sender = self
            .lanes
            .entry(user_id)
            .or_insert_with(|| self.spawn_lane(user_id))
            .clone();

        if let Err(mpsc::error::SendError(event)) = sender.send(event) {
            warn!("Lane for user {} stopped, restarting it", user_id);
            let sender = self.spawn_lane(user_id);
            self.lanes.insert(user_id, sender.clone());
            if sender.send(event).is_err() {
                warn!("Dropped event for user {}", user_id);
            }
        }
    }

    /// Stop accepting events. Lanes finish their queued turns and exit.
    pub fn close(&self) {
        self.lanes.clear();
    }

    fn spawn_lane(&self, user_id: UserId) -> mpsc::UnboundedSender<InboundEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
        let bot = self.bot.clone();
        let transport = self.transport.clone();

        debug!("Opening lane for user {}", user_id);
        tokio::spawn(
            async move {
                while let Some(event) = rx.recv().await {
                    let kind = event.kind.label();
                    let outcome = bot.handle(event, transport.as_ref()).await;
                    match &outcome.error {
                        Some(err) => debug!("{} -> {} ({})", kind, outcome.state, err),
                        None => debug!("{} -> {}", kind, outcome.state),
                    }
                }
                debug!("Lane closed");
            }
            .instrument(info_span!("lane", user = %user_id)),
        );
        tx
    }
}

/// How often the reaper looks for idle sessions.
pub fn reap_period(max_idle: Duration) -> Duration {
    (max_idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Evict sessions idle longer than `max_idle` every `period` until cancelled.
pub fn spawn_idle_reaper(
    registry: Arc<SessionRegistry>,
    max_idle: Duration,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Idle reaper stopped");
                    break;
                }

                _ = ticker.tick() => {
                    let evicted = registry.evict_idle(max_idle).await;
                    if !evicted.is_empty() {
                        info!("Evicted {} idle session(s)", evicted.len());
                    }
                }
            }
        }
    })
}
