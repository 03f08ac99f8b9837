//! Alert transport: Telegram Bot API `sendPhoto`.

use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to read snapshot {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram rejected the photo (status {status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Sends an alert photo somewhere a human will see it.
#[allow(async_fn_in_trait)]
pub trait AlertDispatcher {
    async fn send_photo(&self, path: &Path) -> Result<(), DispatchError>;
}

impl<D: AlertDispatcher> AlertDispatcher for &D {
    async fn send_photo(&self, path: &Path) -> Result<(), DispatchError> {
        (**self).send_photo(path).await
    }
}

#[derive(Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot-token + chat-id Telegram client. One attempt per alert, no retries.
pub struct TelegramDispatcher {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramDispatcher {
    pub fn new(token: String, chat_id: String) -> Result<Self, DispatchError> {
        Self::with_base_url(TELEGRAM_API.to_string(), token, chat_id)
    }

    pub fn with_base_url(base_url: String, token: String, chat_id: String) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token,
            chat_id,
        })
    }

    fn send_photo_url(&self) -> String {
        format!("{}/bot{}/sendPhoto", self.base_url.trim_end_matches('/'), self.token)
    }
}

impl AlertDispatcher for TelegramDispatcher {
    async fn send_photo(&self, path: &Path) -> Result<(), DispatchError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| DispatchError::Snapshot {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown.jpg".to_string());

        let form = multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .part(
                "photo",
                multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("image/jpeg")?,
            );

        let response = self.client.post(self.send_photo_url()).multipart(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        check_response(status, &body)?;
        tracing::info!(chat_id = %self.chat_id, "alert photo sent");
        Ok(())
    }
}

/// Accepted only on a 2xx status whose body says `"ok": true`.
fn check_response(status: StatusCode, body: &[u8]) -> Result<(), DispatchError> {
    let parsed: Option<TelegramResponse> = serde_json::from_slice(body).ok();
    match parsed {
        Some(TelegramResponse { ok: true, .. }) if status.is_success() => Ok(()),
        other => Err(DispatchError::Rejected {
            status: status.as_u16(),
            description: other
                .and_then(|r| r.description)
                .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
        }),
    }
}
