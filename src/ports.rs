// ===============================
// src/ports.rs
// ===============================
//
// Capability seams between the orchestrator and the outside world.
// Production adapters (kraken, predictor, recorder, notify) and the test
// doubles in testkit.rs both implement these.
//
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{OpenPositionsResponse, Order, OrderEvent, OrderResponse, Tick};
use crate::error::ExchangeError;

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_positions(&self) -> Result<OpenPositionsResponse, ExchangeError>;
    async fn send_order(&self, order: &Order) -> Result<OrderResponse, ExchangeError>;
    async fn cancel_orders(&self) -> Result<OrderResponse, ExchangeError>;
    async fn subscribe(&self, instruments: &[String]) -> Result<mpsc::Receiver<Tick>, ExchangeError>;
    async fn unsubscribe(&self) -> Result<(), ExchangeError>;
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model returned status {0}")]
    Status(u16),
    #[error("model response has no prediction")]
    Empty,
    #[error("score {0} is outside [0, 1]")]
    OutOfRange(f64),
}

/// Scores a window of ticks; values near 1 favour buying.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, ticks: &[Tick]) -> Result<f64, PredictError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage queue is full")]
    QueueFull,
    #[error("storage is closed")]
    Closed,
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn store_event(&self, event: &OrderEvent) -> Result<(), StorageError>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier's job queue is full")]
    QueueFull,
    #[error("notifier is not started")]
    NotStarted,
    #[error("notifier has no recipients")]
    NoRecipients,
}

/// Delivery is best effort; `notify` only enqueues.
pub trait Notifier: Send + Sync {
    fn start(&self) -> Result<(), NotifyError>;
    fn notify(&self, text: &str) -> Result<(), NotifyError>;
    fn stop(&self);
}
