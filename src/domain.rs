// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const SUCCESS: &str = "success";
pub const PLACED: &str = "placed";
pub const CANCELLED: &str = "cancelled";
pub const EXECUTION: &str = "EXECUTION";

/// Outcome of a trade decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action { Buy, Sell, None }

impl Action {
    pub fn side(&self) -> Option<Side> {
        match self {
            Action::Buy => Some(Side::Buy),
            Action::Sell => Some(Side::Sell),
            Action::None => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self { Action::Buy => "buy", Action::Sell => "sell", Action::None => "none" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Buy, Sell }

impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType { Lmt, Ioc, Mkt }

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self { OrderType::Lmt => "lmt", OrderType::Ioc => "ioc", OrderType::Mkt => "mkt" }
    }
}

/// Lifecycle of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectorState { Disconnected = 0, Connected = 1, Closing = 2 }

impl ConnectorState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectorState::Connected,
            2 => ConnectorState::Closing,
            _ => ConnectorState::Disconnected,
        }
    }
}

/// One ticker snapshot as published on the futures `ticker` feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: i64,
    pub feed: String,
    pub product_id: String,
    pub bid: f64,
    pub ask: f64,
    #[serde(default)]
    pub bid_size: f64,
    #[serde(default)]
    pub ask_size: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub dtm: i64,
    #[serde(default)]
    pub leverage: String,
    #[serde(default)]
    pub last: f64,
    #[serde(default)]
    pub change: f64,
    #[serde(rename = "openInterest", default)]
    pub open_interest: f64,
}

impl Tick {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.time).single()
    }

    /// Row fed to the model: bid, ask, bid/ask size, volume, dtm, last, change, OI.
    pub fn features(&self) -> [f64; 9] {
        [
            self.bid,
            self.ask,
            self.bid_size,
            self.ask_size,
            self.volume,
            self.dtm as f64,
            self.last,
            self.change,
            self.open_interest,
        ]
    }
}

/// Fixed-length batch of ticks for one instrument. Built only by the sequence buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    instrument: String,
    ticks: Vec<Tick>,
}

impl Window {
    pub(crate) fn new(instrument: String, ticks: Vec<Tick>) -> Self {
        Self { instrument, ticks }
    }
    pub fn instrument(&self) -> &str { &self.instrument }
    pub fn ticks(&self) -> &[Tick] { &self.ticks }
    pub fn len(&self) -> usize { self.ticks.len() }
    pub fn is_empty(&self) -> bool { self.ticks.is_empty() }
    pub fn last(&self) -> Option<&Tick> { self.ticks.last() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price: f64,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(symbol: &str, side: Side, order_type: OrderType, limit_price: f64, quantity: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            limit_price,
            quantity,
            created_at: Utc::now(),
        }
    }
}

// ---- REST responses ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(default)]
    pub limit_price: f64,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(rename = "orderPriorExecution", default)]
    pub order_prior_execution: Option<OrderSnapshot>,
    #[serde(default)]
    pub order: Option<OrderSnapshot>,
}

impl OrderEvent {
    pub fn is_execution(&self) -> bool { self.event_type == EXECUTION }

    /// The order as it was before this event, whichever field the exchange filled in.
    pub fn snapshot(&self) -> Option<&OrderSnapshot> {
        self.order_prior_execution.as_ref().or(self.order.as_ref())
    }

    /// Executed contracts; zero for non-execution events.
    pub fn filled(&self) -> i64 {
        if !self.is_execution() {
            return 0;
        }
        self.amount.map(|a| a.round() as i64).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub status: String,
    #[serde(rename = "orderEvents", default)]
    pub order_events: Vec<OrderEvent>,
}

impl Status {
    pub fn is_placed(&self) -> bool { self.status == PLACED }
}

/// Envelope for `sendorder` (`sendStatus`) and `cancelallorders` (`cancelStatus`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub result: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(rename = "sendStatus", alias = "cancelStatus", default)]
    pub status: Status,
}

impl OrderResponse {
    pub fn is_success(&self) -> bool { self.result == SUCCESS }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }

    pub fn first_event(&self) -> Option<&OrderEvent> { self.status.order_events.first() }

    /// Contracts actually filled, read from the first event of a placed order.
    pub fn filled_amount(&self) -> i64 {
        if !self.is_success() || !self.status.is_placed() {
            return 0;
        }
        self.first_event().map(OrderEvent::filled).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: String,
    pub symbol: String,
    #[serde(default)]
    pub price: f64,
    pub size: i64,
}

impl OpenPosition {
    pub fn signed_size(&self) -> i64 {
        if self.side == "long" { self.size } else { -self.size }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenPositionsResponse {
    pub result: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(rename = "openPositions", default)]
    pub open_positions: Vec<OpenPosition>,
}

impl OpenPositionsResponse {
    pub fn is_success(&self) -> bool { self.result == SUCCESS }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEND_ORDER_PLACED: &str = r#"{
        "result":"success",
        "sendStatus":{
            "order_id":"61ca5732-3478-42fe-8362-abbfd9465294",
            "status":"placed",
            "receivedTime":"2019-12-11T17:17:33.888Z",
            "orderEvents":[{
                "executionId":"e1ec9f63-2338-4c44-b40a-43486c6732d7",
                "price":7244.5,
                "amount":10,
                "orderPriorEdit":null,
                "orderPriorExecution":{
                    "orderId":"61ca5732-3478-42fe-8362-abbfd9465294",
                    "cliOrdId":null,
                    "type":"lmt",
                    "symbol":"pi_xbtusd",
                    "side":"buy",
                    "quantity":10,
                    "filled":0,
                    "limitPrice":7500,
                    "reduceOnly":false,
                    "timestamp":"2019-12-11T17:17:33.888Z",
                    "lastUpdateTimestamp":"2019-12-11T17:17:33.888Z"
                },
                "takerReducedQuantity":null,
                "type":"EXECUTION"
            }]
        },
        "serverTime":"2019-12-11T17:17:33.888Z"
    }"#;

    #[test]
    fn decodes_ticker_and_ignores_extra_fields() {
        let raw = r#"{"time":1612270825253,"feed":"ticker","product_id":"PI_XBTUSD","bid":34832.5,
            "ask":34847.5,"bid_size":42864,"ask_size":2300,"volume":262306237,"dtm":0,"leverage":"50x",
            "index":34803.45,"premium":0.1,"last":34852,"change":2.995109121267192,"suspended":false,
            "openInterest":107706940,"markPrice":34844.25}"#;
        let tick: Tick = serde_json::from_str(raw).unwrap();
        assert_eq!(tick.product_id, "PI_XBTUSD");
        assert_eq!(tick.ask, 34847.5);
        assert_eq!(tick.leverage, "50x");
        assert_eq!(tick.open_interest, 107706940.0);
        assert_eq!(tick.features()[6], 34852.0);
        assert!(tick.timestamp().is_some());
    }

    #[test]
    fn placed_execution_reports_filled_amount() {
        let resp: OrderResponse = serde_json::from_str(SEND_ORDER_PLACED).unwrap();
        assert!(resp.is_success());
        assert!(resp.status.is_placed());
        assert_eq!(resp.filled_amount(), 10);
        let snap = resp.first_event().and_then(|e| e.snapshot()).unwrap();
        assert_eq!(snap.symbol, "pi_xbtusd");
        assert_eq!(snap.limit_price, 7500.0);
    }

    #[test]
    fn cancel_status_maps_onto_status() {
        let raw = r#"{"result":"success","cancelStatus":{"status":"cancelled","orderEvents":[]}}"#;
        let resp: OrderResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.status.status, CANCELLED);
        assert_eq!(resp.filled_amount(), 0);
    }

    #[test]
    fn error_envelope_has_no_fill() {
        let raw = r#"{"result":"error","error":"apiLimitExceeded"}"#;
        let resp: OrderResponse = serde_json::from_str(raw).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.error_message(), "apiLimitExceeded");
        assert_eq!(resp.filled_amount(), 0);
    }

    #[test]
    fn short_positions_are_negative() {
        let long = OpenPosition { side: "long".into(), symbol: "pi_xbtusd".into(), price: 1.0, size: 5 };
        let short = OpenPosition { side: "short".into(), ..long.clone() };
        assert_eq!(long.signed_size(), 5);
        assert_eq!(short.signed_size(), -5);
    }
}
