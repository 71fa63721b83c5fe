//! `getUpdates` long polling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::api::TelegramApi;
use super::to_event;
use super::types::Update;
use crate::bot::dispatch::Dispatcher;
use crate::bot::error::TransportError;

const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);

/// Poll until `cancel` fires, submitting every update to `dispatcher`.
///
/// Transient failures back off and retry; a rejected token ends the loop
/// with an error.
pub async fn run_polling(
    api: TelegramApi,
    dispatcher: Arc<Dispatcher>,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    // getUpdates is refused while a webhook is registered
    api.delete_webhook().await?;
    info!("Polling for updates (timeout {:?})", timeout);

    let mut offset = 0;
    let mut failures = 0u32;

    loop {
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            result = api.get_updates(offset, timeout) => result,
        };

        match result {
            Ok(updates) => {
                failures = 0;
                for update in updates {
                    offset = next_offset(offset, &update);
                    if let Some(event) = to_event(update, &api) {
                        dispatcher.submit(event);
                    }
                }
            }
            Err(e) if is_fatal(&e) => {
                error!("Polling stopped: {}", e);
                return Err(e);
            }
            Err(e) => {
                failures += 1;
                let delay = poll_backoff(failures);
                warn!("getUpdates failed: {}. Retrying in {:?}", e, delay);
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    info!("Polling stopped");
    Ok(())
}

/// Offset that acknowledges `update`.
fn next_offset(current: i64, update: &Update) -> i64 {
    current.max(update.update_id + 1)
}

/// Delay after the `failures`-th consecutive polling failure.
fn poll_backoff(failures: u32) -> Duration {
    let secs = 1u64 << failures.saturating_sub(1).min(5);
    Duration::from_secs(secs).min(MAX_POLL_BACKOFF)
}

/// Errors that retrying cannot fix.
fn is_fatal(err: &TransportError) -> bool {
    matches!(err, TransportError::Api { code: 401 | 404, .. })
}
