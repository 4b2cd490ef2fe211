// ===============================
// src/gateway_kraken.rs
// ===============================
//
// Signed REST calls against the Kraken Futures order endpoints.
// Every request is signed over (body ++ endpoint path), where the path is
// relative to the `/derivatives` base, e.g. `/api/v3/sendorder`.
// No retries here: the caller decides what to do with a failure.
//
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{OpenPositionsResponse, Order, OrderResponse};
use crate::error::ExchangeError;
use crate::kraken::ApiKeys;

pub const SEND_ORDER_PATH: &str = "/api/v3/sendorder";
pub const CANCEL_ORDERS_PATH: &str = "/api/v3/cancelallorders";
pub const OPEN_POSITIONS_PATH: &str = "/api/v3/openpositions";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    keys: ApiKeys,
}

impl RestClient {
    pub fn new(base_url: &str, keys: ApiKeys, timeout: Duration) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
        })
    }

    pub async fn get_positions(&self) -> Result<OpenPositionsResponse, ExchangeError> {
        self.call(Method::GET, OPEN_POSITIONS_PATH, String::new()).await
    }

    pub async fn send_order(&self, order: &Order) -> Result<OrderResponse, ExchangeError> {
        let body = order_form(order);
        let resp: OrderResponse = self.call(Method::POST, SEND_ORDER_PATH, body).await?;
        if resp.is_success() {
            info!(
                symbol = %order.symbol,
                side = order.side.as_str(),
                size = order.quantity,
                px = order.limit_price,
                status = %resp.status.status,
                "order sent"
            );
        } else {
            warn!(symbol = %order.symbol, error = resp.error_message(), "order rejected by exchange");
        }
        Ok(resp)
    }

    pub async fn cancel_orders(&self) -> Result<OrderResponse, ExchangeError> {
        self.call(Method::POST, CANCEL_ORDERS_PATH, String::new()).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: String,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let authent = HeaderValue::from_str(&self.keys.sign(body.as_bytes(), path))?;
        let api_key = HeaderValue::from_str(self.keys.public())?;

        debug!(%method, %url, body_len = body.len(), "kraken request");
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("APIKey", api_key)
            .header("Authent", authent);
        if method == Method::POST {
            req = req.header(CONTENT_TYPE, FORM_CONTENT_TYPE).body(body);
        }

        let rsp = req.send().await?;
        let status = rsp.status();
        let bytes = rsp.bytes().await?;
        if !status.is_success() {
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Form body in the field order the exchange documents.
pub fn order_form(order: &Order) -> String {
    let params = [
        ("symbol", order.symbol.clone()),
        ("limitPrice", format!("{:.3}", order.limit_price)),
        ("size", order.quantity.to_string()),
        ("side", order.side.as_str().to_string()),
        ("orderType", order.order_type.as_str().to_string()),
    ];
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
