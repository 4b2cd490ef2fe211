// ===============================
// src/lib.rs
// ===============================
pub mod bot;
pub mod config;
pub mod domain;
pub mod error;
pub mod feed;
pub mod gateway_kraken; // signed REST (sendorder / cancelallorders / openpositions)
pub mod kraken;         // signer + wire types + ExchangeApi facade
pub mod metrics;
pub mod notify;
pub mod ports;
pub mod positions;
pub mod posttrade;
pub mod predictor;
pub mod recorder;
pub mod risk;
pub mod sequence;
pub mod strategy;

#[cfg(test)]
mod testkit;
