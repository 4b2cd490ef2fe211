// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : krakenbot, async futures trading bot in Rust
Module  : config.rs
License : MIT (see LICENSE)

Summary : Reads `.env` + environment into typed settings. Every key has a
          default except the exchange credentials. Validation happens
          once, at load.
=============================================================================
*/
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dotenvy::{dotenv, from_path};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INSTRUMENT: &str = "PI_XBTUSD";
pub const DEFAULT_REST_URL: &str = "https://demo-futures.kraken.com/derivatives";
pub const DEFAULT_WS_URL: &str = "wss://demo-futures.kraken.com/ws/v1";
pub const DEFAULT_PREDICTOR_URL: &str = "http://localhost:7070/v1/models/trade_model:predict";
pub const DEFAULT_RECORD_FILE: &str = "data/order_events.jsonl";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("decision threshold must be in (0.5, 1], got {0}")]
    Threshold(f64),
    #[error("sequence length must be positive")]
    SequenceLength,
    #[error("max position size must be positive, got {0}")]
    MaxPosition(i64),
    #[error("order size must be positive, got {0}")]
    OrderSize(i64),
    #[error("price slip percent must be finite and non-negative, got {0}")]
    SlipPercent(f64),
    #[error("max consecutive failures must be positive")]
    MaxFailures,
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key}: cannot parse {value:?}")]
    Parse { key: &'static str, value: String },
    #[error("KRAKEN_PRIVATE_KEY is not valid base64: {0}")]
    PrivateKey(#[source] base64::DecodeError),
    #[error("env file {path}: {source}")]
    EnvFile { path: String, source: dotenvy::Error },
}

/// Trading parameters owned by the bot.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameters {
    pub instrument: String,
    pub max_position_size: i64,
    pub order_size: i64,
    pub decision_threshold: f64,
    pub sequence_length: usize,
    pub price_slip_percent: f64,
    pub max_consecutive_failures: u32,
    pub cancel_on_stop: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            instrument: DEFAULT_INSTRUMENT.to_string(),
            max_position_size: 10,
            order_size: 1,
            decision_threshold: 0.6,
            sequence_length: 20,
            price_slip_percent: 1.0,
            max_consecutive_failures: 5,
            cancel_on_stop: false,
        }
    }
}

impl Parameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.decision_threshold > 0.5 && self.decision_threshold <= 1.0) {
            return Err(ConfigError::Threshold(self.decision_threshold));
        }
        if self.sequence_length == 0 {
            return Err(ConfigError::SequenceLength);
        }
        if self.max_position_size <= 0 {
            return Err(ConfigError::MaxPosition(self.max_position_size));
        }
        if self.order_size <= 0 {
            return Err(ConfigError::OrderSize(self.order_size));
        }
        if !self.price_slip_percent.is_finite() || self.price_slip_percent < 0.0 {
            return Err(ConfigError::SlipPercent(self.price_slip_percent));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::MaxFailures);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct KrakenSettings {
    pub public_key: String,
    pub private_key: String,
    pub rest_url: String,
    pub ws_url: String,
    pub feed: String,
    pub rest_timeout: Duration,
    pub reconnect_attempts: u32,
    pub backoff: Duration,
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_ids: Vec<i64>,
    pub queue_size: usize,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub params: Parameters,
    pub kraken: KrakenSettings,
    pub predictor_url: String,
    pub predictor_timeout: Duration,
    pub record_file: String,
    /// `None` when TELEGRAM_TOKEN is unset; notifications then go to the log.
    pub telegram: Option<TelegramSettings>,
    pub metrics_port: u16,
}

/// Loads `.env` (or `env_file` when given) and then reads the process environment.
pub fn load(env_file: Option<&Path>) -> Result<Settings, ConfigError> {
    match env_file {
        Some(p) => {
            from_path(p).map_err(|source| ConfigError::EnvFile { path: p.display().to_string(), source })?;
        }
        None => {
            let _ = dotenv();
        }
    }
    from_lookup(|k| env::var(k).ok())
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => v.parse().map_err(|_| ConfigError::Parse { key, value: v }),
        None => Ok(default),
    }
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<String, ConfigError> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

/// Builds settings from any key lookup; `load` passes the process environment.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Settings, ConfigError> {
    let defaults = Parameters::default();

    // ===== Trading =====
    let params = Parameters {
        instrument: text(&lookup, "INSTRUMENT", DEFAULT_INSTRUMENT),
        max_position_size: parsed(&lookup, "MAX_POSITION_SIZE", defaults.max_position_size)?,
        order_size: parsed(&lookup, "ORDER_SIZE", defaults.order_size)?,
        decision_threshold: parsed(&lookup, "DECISION_THRESHOLD", defaults.decision_threshold)?,
        sequence_length: parsed(&lookup, "SEQUENCE_LENGTH", defaults.sequence_length)?,
        price_slip_percent: parsed(&lookup, "PRICE_SLIP_PERCENT", defaults.price_slip_percent)?,
        max_consecutive_failures: parsed(&lookup, "MAX_CONSECUTIVE_FAILURES", defaults.max_consecutive_failures)?,
        cancel_on_stop: parsed(&lookup, "CANCEL_ON_STOP", defaults.cancel_on_stop)?,
    };
    params.validate()?;

    // ===== Exchange =====
    let public_key = required(&lookup, "KRAKEN_PUBLIC_KEY")?;
    let private_key = required(&lookup, "KRAKEN_PRIVATE_KEY")?;
    STANDARD.decode(&private_key).map_err(ConfigError::PrivateKey)?;

    let kraken = KrakenSettings {
        public_key,
        private_key,
        rest_url: text(&lookup, "KRAKEN_REST_URL", DEFAULT_REST_URL),
        ws_url: text(&lookup, "KRAKEN_WS_URL", DEFAULT_WS_URL),
        feed: text(&lookup, "KRAKEN_FEED", "ticker"),
        rest_timeout: Duration::from_millis(parsed(&lookup, "REST_TIMEOUT_MS", 5_000u64)?),
        reconnect_attempts: parsed(&lookup, "WS_RECONNECT_ATTEMPTS", 10u32)?,
        backoff: Duration::from_millis(parsed(&lookup, "WS_BACKOFF_MS", 500u64)?),
        connect_timeout: Duration::from_millis(parsed(&lookup, "WS_CONNECT_TIMEOUT_MS", 10_000u64)?),
    };

    // ===== Collaborators =====
    let telegram = match lookup("TELEGRAM_TOKEN").filter(|t| !t.trim().is_empty()) {
        Some(token) => {
            let raw = lookup("TELEGRAM_CHAT_IDS").unwrap_or_default();
            let mut chat_ids = Vec::new();
            for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let id = id
                    .parse()
                    .map_err(|_| ConfigError::Parse { key: "TELEGRAM_CHAT_IDS", value: id.to_string() })?;
                chat_ids.push(id);
            }
            Some(TelegramSettings {
                token: token.trim().to_string(),
                chat_ids,
                queue_size: parsed(&lookup, "NOTIFY_QUEUE_SIZE", 10usize)?,
            })
        }
        None => None,
    };

    Ok(Settings {
        params,
        kraken,
        predictor_url: text(&lookup, "PREDICTOR_URL", DEFAULT_PREDICTOR_URL),
        predictor_timeout: Duration::from_millis(parsed(&lookup, "PREDICTOR_TIMEOUT_MS", 2_000u64)?),
        record_file: text(&lookup, "RECORD_FILE", DEFAULT_RECORD_FILE),
        telegram,
        metrics_port: parsed(&lookup, "METRICS_PORT", 9898u16)?,
    })
}
