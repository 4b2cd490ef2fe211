// ===============================
// src/metrics.rs
// ===============================
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Pipeline --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "ticks received from the feed").unwrap());

pub static WINDOWS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("windows_total", "full windows emitted by the sequence buffer").unwrap());

pub static DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("decisions_total", "decisions by action"), &["action"]).unwrap()
});

pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_total", "orders sent by outcome"), &["outcome"]).unwrap()
});

pub static WINDOW_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("window_failures_total", "windows whose processing failed").unwrap()
});

// -------- Inventory --------
pub static POSITION: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("position_contracts", "net contracts per symbol"), &["symbol"]).unwrap()
});

// -------- WebSocket health --------
pub static WS_CONNECTED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("ws_connected", "1 if the ticker feed is connected, 0 otherwise").unwrap());

pub static WS_RECONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ws_reconnects_total", "successful ticker feed reconnects").unwrap());

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(WINDOWS.clone())),
        REGISTRY.register(Box::new(DECISIONS.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(WINDOW_FAILURES.clone())),
        REGISTRY.register(Box::new(POSITION.clone())),
        REGISTRY.register(Box::new(WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(WS_RECONNECTS.clone())),
    ] {
        if let Err(e) = m {
            error!(error = %e, "metric registration failed");
        }
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Serves every path (`/`, `/metrics`, ...) with the text exposition.
pub async fn serve_metrics(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    let server = match Server::try_bind(&addr) {
        Ok(b) => b.serve(make_svc),
        Err(e) => {
            error!(error = %e, %addr, "metrics bind failed");
            return;
        }
    };
    info!(%addr, "metrics listening");
    if let Err(e) = server.await {
        error!(error = %e, "metrics server stopped");
    }
}
