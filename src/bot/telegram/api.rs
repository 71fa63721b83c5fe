//! Minimal Bot API client over `reqwest`.
//!
//! Every method except `getUpdates` is retried with exponential backoff on
//! transient failures (network errors, 5xx, 429). A 429 with `retry_after`
//! waits exactly as long as the server asks.

use std::fmt;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, warn};

use super::types::{ApiResponse, BotCommand, File, GetUpdates, SendMessage, Update};
use crate::bot::error::TransportError;

const API_BASE: &str = "https://api.telegram.org";

/// Timeout for ordinary Bot API calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time granted to a long poll beyond its server-side timeout
const POLL_GRACE: Duration = Duration::from_secs(10);

const MAX_RETRIES: usize = 4;
const MIN_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Update kinds the bot subscribes to.
pub const ALLOWED_UPDATES: &[&str] = &["message"];

/// Bot API client bound to one bot token.
#[derive(Clone)]
pub struct TelegramApi {
    client: reqwest::Client,
    method_base: String,
    file_base: String,
}

impl fmt::Debug for TelegramApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramApi")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl TelegramApi {
    pub fn new(token: &str) -> Result<Self, TransportError> {
        Self::with_base(API_BASE, token)
    }

    /// Client against an alternative Bot API server.
    pub fn with_base(base: &str, token: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let base = base.trim_end_matches('/');
        Ok(Self {
            client,
            method_base: format!("{}/bot{}", base, token),
            file_base: format!("{}/file/bot{}", base, token),
        })
    }

    /// Long-poll for updates after `offset`. Not retried.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        let params = GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: ALLOWED_UPDATES,
        };
        self.call("getUpdates", &params, timeout + POLL_GRACE).await
    }

    pub async fn send_message(&self, message: &SendMessage<'_>) -> Result<(), TransportError> {
        let _: IgnoredAny = self.call_with_retry("sendMessage", message).await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File, TransportError> {
        self.call_with_retry("getFile", &serde_json::json!({ "file_id": file_id }))
            .await
    }

    /// Download a file previously resolved with [`get_file`](Self::get_file).
    ///
    /// Bodies larger than `max_bytes` are refused, whether the server
    /// announces the length or not.
    pub async fn download(
        &self,
        file_path: &str,
        max_bytes: u64,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/{}", self.file_base, file_path);
        (|| self.fetch_file(&url, max_bytes))
            .retry(backoff())
            .when(TransportError::is_transient)
            .notify(|err, dur| warn!("File download failed: {}. Retrying in {:?}", err, dur))
            .await
    }

    async fn fetch_file(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, TransportError> {
        let mut response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Api {
                code: status.as_u16(),
                description: "file download failed".to_string(),
                retry_after: None,
            });
        }
        if let Some(len) = response.content_length() {
            check_file_size(len, max_bytes)?;
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            check_file_size(body.len() as u64, max_bytes)?;
        }
        Ok(body)
    }

    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<(), TransportError> {
        let _: IgnoredAny = self
            .call_with_retry("setMyCommands", &serde_json::json!({ "commands": commands }))
            .await?;
        Ok(())
    }

    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), TransportError> {
        let mut params = serde_json::json!({
            "url": url,
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(secret) = secret {
            params["secret_token"] = serde_json::Value::from(secret);
        }
        let _: IgnoredAny = self.call_with_retry("setWebhook", &params).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<(), TransportError> {
        let _: IgnoredAny = self
            .call_with_retry("deleteWebhook", &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn call_with_retry<P, T>(&self, method: &'static str, params: &P) -> Result<T, TransportError>
    where
        P: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        (|| async { self.call(method, params, REQUEST_TIMEOUT).await })
            .retry(backoff())
            .when(TransportError::is_transient)
            .adjust(|err, dur| match err {
                TransportError::Api {
                    retry_after: Some(secs),
                    ..
                } => Some(Duration::from_secs(*secs)),
                _ => dur,
            })
            .notify(|err, dur| {
                warn!("Bot API {} failed: {}. Retrying in {:?}", method, err, dur);
            })
            .await
    }

    async fn call<P, T>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<T, TransportError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("Bot API call {}", method);
        let response = self
            .client
            .post(format!("{}/{}", self.method_base, method))
            .timeout(timeout)
            .json(params)
            .send()
            .await?;

        let status = response.status();
        match response.json::<ApiResponse<T>>().await {
            Ok(body) => into_result(body),
            // Proxies answer 5xx with HTML bodies
            Err(_) if status.is_server_error() => Err(TransportError::Api {
                code: status.as_u16(),
                description: status.to_string(),
                retry_after: None,
            }),
            Err(e) => Err(TransportError::Decode(e.without_url().to_string())),
        }
    }
}

fn check_file_size(len: u64, max_bytes: u64) -> Result<(), TransportError> {
    if len > max_bytes {
        return Err(TransportError::Decode(format!(
            "file is too large ({} bytes, limit {})",
            len, max_bytes
        )));
    }
    Ok(())
}

fn backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(MIN_RETRY_DELAY)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(MAX_RETRIES)
        .with_jitter()
}

/// Unwrap a Bot API envelope.
pub(crate) fn into_result<T>(body: ApiResponse<T>) -> Result<T, TransportError> {
    match body {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse {
            ok: true,
            result: None,
            ..
        } => Err(TransportError::Decode("response has no result".to_string())),
        ApiResponse {
            error_code,
            description,
            parameters,
            ..
        } => Err(TransportError::Api {
            code: error_code.unwrap_or_default(),
            description: description.unwrap_or_else(|| "unknown error".to_string()),
            retry_after: parameters.and_then(|p| p.retry_after),
        }),
    }
}
