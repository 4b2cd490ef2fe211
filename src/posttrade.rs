// ===============================
// src/posttrade.rs
// ===============================
use std::fmt::Display;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{OrderEvent, OrderResponse, OrderSnapshot};
use crate::ports::{Notifier, Storage};

/// Message layout for order outcomes. Built once and owned by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTemplate {
    pub executed: String,
    pub canceled: String,
    pub placed: String,
    pub failed: String,
    pub error_prefix: String,
}

impl Default for NotificationTemplate {
    fn default() -> Self {
        Self {
            executed: "*The order has been EXECUTED*:".to_string(),
            canceled: "*The order has been CANCELED:*".to_string(),
            placed: "*The order has been PLACED*".to_string(),
            failed: "*Placing the order FAILED.*".to_string(),
            error_prefix: "sending order failed: ".to_string(),
        }
    }
}

impl NotificationTemplate {
    pub fn render(&self, resp: &OrderResponse) -> String {
        if !resp.is_success() {
            return format!("{}{}", self.error_prefix, resp.error_message());
        }
        let status = &resp.status.status;
        if resp.status.order_events.is_empty() {
            return if resp.status.is_placed() {
                self.placed.clone()
            } else {
                format!("{}\nStatus: {}", self.failed, status)
            };
        }
        resp.status
            .order_events
            .iter()
            .map(|e| self.render_event(e, status))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_event(&self, e: &OrderEvent, status: &str) -> String {
        let fallback = OrderSnapshot::default();
        let snap = e.snapshot().unwrap_or(&fallback);
        if e.is_execution() {
            format!(
                "{}\n{} {} *{}* at {}",
                self.executed,
                snap.side,
                e.filled(),
                snap.symbol,
                e.price.unwrap_or(snap.limit_price)
            )
        } else {
            format!(
                "{}\n{} {} *{}* at {}\nStatus: {}",
                self.canceled,
                snap.side,
                snap.quantity.round() as i64,
                snap.symbol,
                snap.limit_price,
                status
            )
        }
    }

    pub fn render_failure(&self, err: &dyn Display) -> String {
        format!("{}{}", self.error_prefix, err)
    }
}

/// Journals placed orders and sends one notification per order outcome.
pub struct PostTrade {
    template: NotificationTemplate,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
}

impl PostTrade {
    pub fn new(template: NotificationTemplate, storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>) -> Self {
        Self { template, storage, notifier }
    }

    pub async fn on_response(&self, resp: &OrderResponse) {
        let message = self.template.render(resp);
        if resp.is_success() && resp.status.is_placed() {
            if let Some(event) = resp.first_event() {
                if let Err(e) = self.storage.store_event(event).await {
                    warn!(error = %e, "storing order event failed");
                }
            }
        }
        self.send(&message);
    }

    pub fn on_failure(&self, err: &dyn Display) {
        let message = self.template.render_failure(err);
        self.send(&message);
    }

    fn send(&self, message: &str) {
        if let Err(e) = self.notifier.notify(message) {
            warn!(error = %e, "notification dropped");
        }
        info!(%message, "order outcome");
    }
}
