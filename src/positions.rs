// ===============================
// src/positions.rs (inventory tracker)
// ===============================

use ahash::AHashMap as HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{Action, Order, OrderResponse, OrderType};
use crate::error::ExchangeError;
use crate::metrics::POSITION;
use crate::ports::ExchangeApi;
use crate::risk::bounded_order_size;

fn key(symbol: &str) -> String { symbol.to_ascii_lowercase() }

/// Signed net position per symbol. Every read-modify-write, including the
/// order round trip to the exchange, happens under one lock.
pub struct PositionManager {
    exchange: Arc<dyn ExchangeApi>,
    instrument: String,
    max_position: i64,
    book: Mutex<HashMap<String, i64>>,
}

impl PositionManager {
    pub fn new(exchange: Arc<dyn ExchangeApi>, instrument: &str, max_position: i64) -> Self {
        Self {
            exchange,
            instrument: instrument.to_string(),
            max_position,
            book: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the whole map with the exchange's view.
    pub async fn fetch_open_positions(&self) -> Result<(), ExchangeError> {
        let mut book = self.book.lock().await;
        let resp = self.exchange.get_positions().await?;
        if !resp.is_success() {
            return Err(ExchangeError::Rejected(resp.error.unwrap_or_else(|| resp.result.clone())));
        }
        for sym in book.keys() {
            POSITION.with_label_values(&[sym.as_str()]).set(0);
        }
        book.clear();
        for p in &resp.open_positions {
            let size = p.signed_size();
            if size != 0 {
                *book.entry(key(&p.symbol)).or_insert(0) += size;
            }
        }
        book.retain(|_, v| *v != 0);
        for (sym, qty) in book.iter() {
            POSITION.with_label_values(&[sym.as_str()]).set(*qty);
        }
        info!(positions = ?*book, "current open positions");
        Ok(())
    }

    /// Moves the configured instrument's position toward `action` by at most
    /// `requested` contracts. Returns the exchange response when an order was sent.
    pub async fn change_position(
        &self,
        action: Action,
        requested: i64,
        price: f64,
    ) -> Result<Option<OrderResponse>, ExchangeError> {
        let Some(side) = action.side() else {
            info!("action was not specified, position unchanged");
            return Ok(None);
        };
        let sym = key(&self.instrument);

        let mut book = self.book.lock().await;
        let current = book.get(&sym).copied().unwrap_or(0);
        let size = bounded_order_size(requested, self.max_position, side.sign(), current);
        if size <= 0 {
            info!(side = side.as_str(), current, max = self.max_position, "no room within position limit, no order");
            return Ok(None);
        }

        let order = Order::new(&sym, side, OrderType::Ioc, price, size);
        let resp = self.exchange.send_order(&order).await?;

        let filled = resp.filled_amount();
        let applied = filled.clamp(0, size);
        if applied != filled {
            warn!(filled, ordered = size, "fill exceeds ordered size, capping");
        }
        if applied != 0 {
            let next = current + side.sign() * applied;
            if next == 0 {
                book.remove(&sym);
            } else {
                book.insert(sym.clone(), next);
            }
            POSITION.with_label_values(&[sym.as_str()]).set(next);
            info!(symbol = %sym, side = side.as_str(), applied, position = next, "position changed");
        }
        Ok(Some(resp))
    }

    pub async fn position(&self, symbol: &str) -> i64 {
        self.book.lock().await.get(&key(symbol)).copied().unwrap_or(0)
    }

    pub async fn snapshot(&self) -> HashMap<String, i64> {
        self.book.lock().await.clone()
    }
}
