// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

use crate::ports::NotifyError;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("json decode: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("bad url {url}: {source}")]
    Url { url: String, source: url::ParseError },

    #[error("the maximum number of reconnection attempts ({attempts}) has been reached")]
    MaxReconnectsExceeded { attempts: u32 },

    #[error("private key is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("exchange rejected request: {0}")]
    Rejected(String),

    #[error("already subscribed")]
    AlreadySubscribed,

    #[error("no active subscription")]
    NotSubscribed,
}

/// Failure to bring the bot up.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("failed to fetch open positions: {0}")]
    Positions(#[source] ExchangeError),

    #[error("failed to subscribe: {0}")]
    Subscribe(#[source] ExchangeError),

    #[error("failed to start notifier: {0}")]
    Notifier(#[from] NotifyError),

    #[error("bot is already running")]
    AlreadyRunning,
}
