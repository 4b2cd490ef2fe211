// ===============================
// src/testkit.rs
// ===============================
//
// Fixtures and hand-written doubles for the capability traits. Test builds only.
//
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::{
    OpenPosition, OpenPositionsResponse, Order, OrderEvent, OrderResponse, OrderSnapshot, Status, Tick,
    EXECUTION, PLACED, SUCCESS,
};
use crate::error::ExchangeError;
use crate::ports::{ExchangeApi, NotifyError, Notifier, PredictError, Predictor, Storage, StorageError};

pub const SECRET_B64: &str = "a3Jha2VuLWZ1dHVyZXMtZGVtby1zZWNyZXQtMDAwMQ==";

pub const SEND_ORDER_PLACED: &str = r#"{
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

pub const OPEN_POSITIONS_SAMPLE: &str = r#"{
    "result":"success",
    "openPositions":[
        {"side":"long","symbol":"pi_xbtusd","price":9392.749993345,"fillTime":"2020-07-22T14:39:12.376Z","size":10000,"unrealizedFunding":1.045432E-7},
        {"side":"short","symbol":"fi_xbtusd_201225","price":9399.749993345,"fillTime":"2020-07-22T14:39:12.376Z","size":20000,"unrealizedFunding":null}
    ],
    "serverTime":"2020-07-22T14:39:12.376Z"
}"#;

/// Ticker with only bid/ask set; every other feature is zero.
pub fn tick(product: &str, time: i64, bid: f64, ask: f64) -> Tick {
    Tick {
        time,
        feed: "ticker".to_string(),
        product_id: product.to_string(),
        bid,
        ask,
        bid_size: 0.0,
        ask_size: 0.0,
        volume: 0.0,
        dtm: 0,
        leverage: String::new(),
        last: 0.0,
        change: 0.0,
        open_interest: 0.0,
    }
}

fn snapshot_of(order: &Order) -> OrderSnapshot {
    OrderSnapshot {
        order_id: "test-order".to_string(),
        symbol: order.symbol.clone(),
        side: order.side.as_str().to_string(),
        order_type: order.order_type.as_str().to_string(),
        limit_price: order.limit_price,
        quantity: order.quantity as f64,
        timestamp: Some(order.created_at.to_rfc3339()),
    }
}

/// Placed response whose single execution fills `amount` contracts of `order`.
pub fn executed(order: &Order, amount: i64) -> OrderResponse {
    OrderResponse {
        result: SUCCESS.to_string(),
        error: None,
        status: Status {
            status: PLACED.to_string(),
            order_events: vec![OrderEvent {
                event_type: EXECUTION.to_string(),
                price: Some(order.limit_price),
                amount: Some(amount as f64),
                order_prior_execution: Some(snapshot_of(order)),
                order: None,
            }],
        },
    }
}

/// IOC order that found no liquidity.
pub fn cancelled(order: &Order) -> OrderResponse {
    OrderResponse {
        result: SUCCESS.to_string(),
        error: None,
        status: Status {
            status: PLACED.to_string(),
            order_events: vec![OrderEvent {
                event_type: "CANCEL".to_string(),
                price: None,
                amount: None,
                order_prior_execution: None,
                order: Some(snapshot_of(order)),
            }],
        },
    }
}

pub fn rejected(message: &str) -> OrderResponse {
    OrderResponse {
        result: "error".to_string(),
        error: Some(message.to_string()),
        status: Status::default(),
    }
}

pub fn positions(entries: &[(&str, &str, i64)]) -> OpenPositionsResponse {
    OpenPositionsResponse {
        result: SUCCESS.to_string(),
        error: None,
        open_positions: entries
            .iter()
            .map(|(side, symbol, size)| OpenPosition {
                side: side.to_string(),
                symbol: symbol.to_string(),
                price: 100.0,
                size: *size,
            })
            .collect(),
    }
}

type OrderResponder = Box<dyn Fn(&Order) -> Result<OrderResponse, ExchangeError> + Send + Sync>;

/// Exchange double. Fills every order completely unless a responder says otherwise.
pub struct FakeExchange {
    positions: Mutex<Result<OpenPositionsResponse, String>>,
    responder: OrderResponder,
    order_delay: Duration,
    orders: Mutex<Vec<Order>>,
    feeds: Mutex<VecDeque<mpsc::Receiver<Tick>>>,
    subscribe_error: AtomicBool,
    unsubscribes: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(Ok(positions(&[]))),
            responder: Box::new(|o| Ok(executed(o, o.quantity))),
            order_delay: Duration::ZERO,
            orders: Mutex::new(Vec::new()),
            feeds: Mutex::new(VecDeque::new()),
            subscribe_error: AtomicBool::new(false),
            unsubscribes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn with_positions(self, resp: OpenPositionsResponse) -> Self {
        *self.positions.lock().unwrap() = Ok(resp);
        self
    }

    /// `get_positions` fails at the transport level.
    pub fn with_positions_error(self, message: &str) -> Self {
        *self.positions.lock().unwrap() = Err(message.to_string());
        self
    }

    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&Order) -> Result<OrderResponse, ExchangeError> + Send + Sync + 'static,
    {
        self.responder = Box::new(f);
        self
    }

    pub fn with_order_delay(mut self, delay: Duration) -> Self {
        self.order_delay = delay;
        self
    }

    /// Queues a feed for a later `subscribe`, in call order; the caller keeps the sender.
    pub fn with_feed(self, capacity: usize) -> (Self, mpsc::Sender<Tick>) {
        let (tx, rx) = mpsc::channel(capacity);
        self.feeds.lock().unwrap().push_back(rx);
        (self, tx)
    }

    pub fn failing_subscribe(self) -> Self {
        self.subscribe_error.store(true, Ordering::SeqCst);
        self
    }

    pub fn orders(&self) -> Vec<Order> { self.orders.lock().unwrap().clone() }
    pub fn unsubscribes(&self) -> usize { self.unsubscribes.load(Ordering::SeqCst) }
    pub fn cancels(&self) -> usize { self.cancels.load(Ordering::SeqCst) }
}

#[async_trait]
impl ExchangeApi for FakeExchange {
    async fn get_positions(&self) -> Result<OpenPositionsResponse, ExchangeError> {
        self.positions.lock().unwrap().clone().map_err(ExchangeError::Rejected)
    }

    async fn send_order(&self, order: &Order) -> Result<OrderResponse, ExchangeError> {
        if !self.order_delay.is_zero() {
            tokio::time::sleep(self.order_delay).await;
        }
        self.orders.lock().unwrap().push(order.clone());
        (self.responder)(order)
    }

    async fn cancel_orders(&self) -> Result<OrderResponse, ExchangeError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(OrderResponse { result: SUCCESS.to_string(), ..Default::default() })
    }

    async fn subscribe(&self, _instruments: &[String]) -> Result<mpsc::Receiver<Tick>, ExchangeError> {
        if self.subscribe_error.load(Ordering::SeqCst) {
            return Err(ExchangeError::MaxReconnectsExceeded { attempts: 1 });
        }
        self.feeds.lock().unwrap().pop_front().ok_or(ExchangeError::AlreadySubscribed)
    }

    async fn unsubscribe(&self) -> Result<(), ExchangeError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Replays scripted scores; the last entry repeats once the script runs out.
pub struct FakePredictor {
    script: Mutex<VecDeque<Result<f64, u16>>>,
    calls: AtomicUsize,
}

impl FakePredictor {
    /// `Err(status)` entries fail like a model server answering with that status.
    pub fn scripted(script: Vec<Result<f64, u16>>) -> Self {
        Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) }
    }

    pub fn fixed(score: f64) -> Self { Self::scripted(vec![Ok(score)]) }

    pub fn failing(status: u16) -> Self { Self::scripted(vec![Err(status)]) }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Predictor for FakePredictor {
    async fn predict(&self, _ticks: &[Tick]) -> Result<f64, PredictError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 { script.pop_front() } else { script.front().cloned() };
        match next {
            Some(Ok(score)) => Ok(score),
            Some(Err(status)) => Err(PredictError::Status(status)),
            None => Err(PredictError::Empty),
        }
    }
}

#[derive(Default)]
pub struct RecordingStorage {
    events: Mutex<Vec<OrderEvent>>,
    fail: AtomicBool,
}

impl RecordingStorage {
    pub fn failing() -> Self {
        Self { fail: AtomicBool::new(true), ..Default::default() }
    }

    pub fn events(&self) -> Vec<OrderEvent> { self.events.lock().unwrap().clone() }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn store_event(&self, event: &OrderEvent) -> Result<(), StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: AtomicBool,
    fail_notify: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing_start() -> Self {
        Self { fail_start: AtomicBool::new(true), ..Default::default() }
    }

    pub fn failing_notify() -> Self {
        Self { fail_notify: AtomicBool::new(true), ..Default::default() }
    }

    pub fn messages(&self) -> Vec<String> { self.messages.lock().unwrap().clone() }
    pub fn starts(&self) -> usize { self.starts.load(Ordering::SeqCst) }
    pub fn stops(&self) -> usize { self.stops.load(Ordering::SeqCst) }
}

impl Notifier for RecordingNotifier {
    fn start(&self) -> Result<(), NotifyError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(NotifyError::NoRecipients);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify(&self, text: &str) -> Result<(), NotifyError> {
        if self.fail_notify.load(Ordering::SeqCst) {
            return Err(NotifyError::QueueFull);
        }
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
