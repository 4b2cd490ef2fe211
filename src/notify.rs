// ===============================
// src/notify.rs
// ===============================
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use crate::ports::{NotifyError, Notifier};

pub const TELEGRAM_API: &str = "https://api.telegram.org";
pub const DEFAULT_QUEUE_SIZE: usize = 10;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

/// Pushes messages to a fixed set of Telegram chats through the Bot API.
/// `notify` only enqueues; a single worker task does the sending.
pub struct TelegramNotifier {
    http: reqwest::Client,
    endpoint: String,
    chat_ids: Vec<i64>,
    queue_size: usize,
    jobs: Mutex<Option<mpsc::Sender<String>>>,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_ids: Vec<i64>, queue_size: usize) -> Self {
        Self::with_api_base(TELEGRAM_API, token, chat_ids, queue_size)
    }

    pub fn with_api_base(api_base: &str, token: &str, chat_ids: Vec<i64>, queue_size: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
            chat_ids,
            queue_size: queue_size.max(1),
            jobs: Mutex::new(None),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn deliver(http: reqwest::Client, endpoint: String, chat_ids: Vec<i64>, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        for &chat_id in &chat_ids {
            let body = SendMessage { chat_id, text: &text, parse_mode: "Markdown" };
            match http.post(&endpoint).json(&body).send().await {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => warn!(chat_id, status = r.status().as_u16(), "telegram rejected message"),
                Err(e) => warn!(chat_id, error = %e, "telegram send failed"),
            }
        }
        if !chat_ids.is_empty() {
            info!(chats = chat_ids.len(), "notification sent");
        }
    }
}

impl Notifier for TelegramNotifier {
    fn start(&self) -> Result<(), NotifyError> {
        if self.chat_ids.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let mut jobs = self.jobs();
        if jobs.as_ref().map_or(false, |tx| !tx.is_closed()) {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel(self.queue_size);
        tokio::spawn(deliver(self.http.clone(), self.endpoint.clone(), self.chat_ids.clone(), rx));
        *jobs = Some(tx);
        Ok(())
    }

    fn notify(&self, text: &str) -> Result<(), NotifyError> {
        let jobs = self.jobs();
        let tx = jobs.as_ref().ok_or(NotifyError::NotStarted)?;
        tx.try_send(text.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::QueueFull,
            TrySendError::Closed(_) => NotifyError::NotStarted,
        })
    }

    /// Queued messages are still delivered; new ones are refused.
    fn stop(&self) {
        self.jobs().take();
    }
}

/// Fallback when no Telegram token is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn start(&self) -> Result<(), NotifyError> { Ok(()) }

    fn notify(&self, text: &str) -> Result<(), NotifyError> {
        info!(%text, "notification");
        Ok(())
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    #[tokio::test]
    async fn notify_before_start_is_refused() {
        let n = TelegramNotifier::with_api_base("http://127.0.0.1:1", "t", vec![1], 2);
        assert!(matches!(n.notify("hi"), Err(NotifyError::NotStarted)));
    }

    #[tokio::test]
    async fn start_without_chats_is_refused() {
        let n = TelegramNotifier::with_api_base("http://127.0.0.1:1", "t", vec![], 2);
        assert!(matches!(n.start(), Err(NotifyError::NoRecipients)));
        assert!(matches!(n.notify("hi"), Err(NotifyError::NotStarted)));
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        // queue without a worker, nothing drains it
        let n = TelegramNotifier::with_api_base("http://127.0.0.1:1", "t", vec![], 1);
        let (tx, _rx) = mpsc::channel(1);
        *n.jobs() = Some(tx);
        n.notify("one").unwrap();
        assert!(matches!(n.notify("two"), Err(NotifyError::QueueFull)));
        n.stop();
        assert!(matches!(n.notify("three"), Err(NotifyError::NotStarted)));
    }

    #[tokio::test]
    async fn messages_are_posted_to_every_chat_in_markdown() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bottoken123/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "text": "*The order has been PLACED*",
                "parse_mode": "Markdown"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .expect(2)
            .create_async()
            .await;

        let n = TelegramNotifier::with_api_base(&server.url(), "token123", vec![10, 20], 4);
        n.start().unwrap();
        n.notify("*The order has been PLACED*").unwrap();
        n.stop();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !mock.matched_async().await && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        mock.assert_async().await;
    }
}
