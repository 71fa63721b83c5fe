//! Webhook delivery served with poem.

use std::sync::Arc;
use std::time::Duration;

use poem::http::StatusCode;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::web::{Data, Json};
use poem::{Endpoint, EndpointExt, Request, Route, Server, handler, post};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::TelegramApi;
use super::to_event;
use super::types::Update;
use crate::bot::dispatch::Dispatcher;

/// Header carrying the secret registered with `setWebhook`.
pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Shared state of the webhook endpoint.
pub struct WebhookState {
    pub api: TelegramApi,
    pub dispatcher: Arc<Dispatcher>,
    pub secret: Option<String>,
}

#[handler]
async fn receive(
    req: &Request,
    Json(update): Json<Update>,
    Data(state): Data<&Arc<WebhookState>>,
) -> StatusCode {
    if let Some(expected) = &state.secret
        && req.header(SECRET_HEADER) != Some(expected.as_str())
    {
        warn!("Rejected webhook call with a bad secret token");
        return StatusCode::UNAUTHORIZED;
    }

    let update_id = update.update_id;
    match to_event(update, &state.api) {
        Some(event) => state.dispatcher.submit(event),
        None => debug!("Ignored update {}", update_id),
    }
    StatusCode::OK
}

/// Path component of the public webhook URL, `/` when absent.
pub fn webhook_path(url: &str) -> String {
    reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/".to_string())
}

/// Build the webhook route tree. The endpoint does not borrow `path`.
pub fn routes(path: &str, state: Arc<WebhookState>) -> impl Endpoint + use<> {
    Route::new()
        .at(path, post(receive))
        .data(state)
        .with(Tracing)
}

/// Register the webhook and serve it until `cancel` fires.
pub async fn run_webhook(
    state: Arc<WebhookState>,
    url: &str,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    state
        .api
        .set_webhook(url, state.secret.as_deref())
        .await?;

    let path = webhook_path(url);
    let addr = format!("0.0.0.0:{}", port);
    info!("Serving webhook {} on {}", path, addr);

    Server::new(TcpListener::bind(addr))
        .name("tg-ssh-bot webhook")
        .run_with_graceful_shutdown(
            routes(&path, state),
            async move { cancel.cancelled().await },
            Some(Duration::from_secs(5)),
        )
        .await?;

    info!("Webhook server stopped");
    Ok(())
}
