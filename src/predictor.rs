// ===============================
// src/predictor.rs
// ===============================
//
// TensorFlow-Serving style REST predictor. One request carries one window:
//   {"signature_name":"serving_default","instances":[[[bid,ask,...],...]]}
// and the score is read from predictions[0][0].
//
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Tick;
use crate::ports::{PredictError, Predictor};

#[derive(Debug, Serialize)]
struct ServeRequest {
    signature_name: &'static str,
    instances: Vec<Vec<[f64; 9]>>,
}

#[derive(Debug, Deserialize)]
struct ServeResponse {
    #[serde(default)]
    predictions: Vec<Vec<f64>>,
}

pub struct ModelClient {
    http: reqwest::Client,
    url: String,
}

impl ModelClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PredictError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.to_string() })
    }
}

#[async_trait]
impl Predictor for ModelClient {
    async fn predict(&self, ticks: &[Tick]) -> Result<f64, PredictError> {
        let req = ServeRequest {
            signature_name: "serving_default",
            instances: vec![ticks.iter().map(Tick::features).collect()],
        };
        let rsp = self.http.post(&self.url).json(&req).send().await?;
        if !rsp.status().is_success() {
            return Err(PredictError::Status(rsp.status().as_u16()));
        }
        let body: ServeResponse = rsp.json().await?;
        let score = body
            .predictions
            .first()
            .and_then(|p| p.first())
            .copied()
            .ok_or(PredictError::Empty)?;
        if !(0.0..=1.0).contains(&score) {
            return Err(PredictError::OutOfRange(score));
        }
        Ok(score)
    }
}
