// ===============================
// src/kraken.rs
// ===============================
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tokio::sync::mpsc;

use crate::domain::{OpenPositionsResponse, Order, OrderResponse, Tick};
use crate::error::ExchangeError;
use crate::feed::StreamingClient;
use crate::gateway_kraken::RestClient;
use crate::ports::ExchangeApi;

type HmacSha512 = Hmac<Sha512>;

/// Public key sent verbatim, private key decoded once up front.
#[derive(Clone)]
pub struct ApiKeys {
    public: String,
    secret: Vec<u8>,
}

impl ApiKeys {
    pub fn new(public: &str, private_b64: &str) -> Result<Self, ExchangeError> {
        let secret = BASE64.decode(private_b64.trim())?;
        Ok(Self { public: public.to_string(), secret })
    }

    pub fn public(&self) -> &str { &self.public }

    pub fn sign(&self, body: &[u8], endpoint_path: &str) -> String {
        authent(body, endpoint_path, &self.secret)
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys").field("public", &self.public).finish_non_exhaustive()
    }
}

/// `Authent` header: base64(HMAC-SHA512(secret, SHA256(body ++ path))).
pub fn authent(body: &[u8], endpoint_path: &str, secret: &[u8]) -> String {
    let mut sha = Sha256::new();
    sha.update(body);
    sha.update(endpoint_path.as_bytes());
    let digest = sha.finalize();

    let mut mac = HmacSha512::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(&digest);
    BASE64.encode(mac.finalize().into_bytes())
}

// ---- WebSocket wire models ----

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeMessage {
    pub event: &'static str,
    pub feed: String,
    pub product_ids: Vec<String>,
}

impl SubscribeMessage {
    pub fn new(feed: &str, product_ids: &[String]) -> Self {
        Self { event: "subscribe", feed: feed.to_string(), product_ids: product_ids.to_vec() }
    }
}

/// Acknowledgements and notices carry an `event` field; data frames do not.
#[derive(Debug, Deserialize)]
pub struct ControlFrame {
    pub event: String,
    #[serde(default)]
    pub feed: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug)]
pub enum Inbound {
    Tick(Tick),
    Control(ControlFrame),
}

pub fn decode_frame(text: &str) -> Result<Inbound, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("event").is_some() {
        return Ok(Inbound::Control(serde_json::from_value(value)?));
    }
    Ok(Inbound::Tick(serde_json::from_value(value)?))
}

// ---- Exchange facade ----

/// Kraken Futures connector: signed REST plus the ticker subscription.
pub struct KrakenApi {
    rest: RestClient,
    stream: StreamingClient,
}

impl KrakenApi {
    pub fn new(rest: RestClient, stream: StreamingClient) -> Self {
        Self { rest, stream }
    }
}

#[async_trait]
impl ExchangeApi for KrakenApi {
    async fn get_positions(&self) -> Result<OpenPositionsResponse, ExchangeError> {
        self.rest.get_positions().await
    }

    async fn send_order(&self, order: &Order) -> Result<OrderResponse, ExchangeError> {
        self.rest.send_order(order).await
    }

    async fn cancel_orders(&self) -> Result<OrderResponse, ExchangeError> {
        self.rest.cancel_orders().await
    }

    async fn subscribe(&self, instruments: &[String]) -> Result<mpsc::Receiver<Tick>, ExchangeError> {
        self.stream.subscribe(instruments).await
    }

    async fn unsubscribe(&self) -> Result<(), ExchangeError> {
        self.stream.unsubscribe().await
    }
}
