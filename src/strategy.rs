// ===============================
// src/strategy.rs
// ===============================
//
// Score-threshold decision on top of the model:
//   score >  t      -> Buy
//   score <  1 - t  -> Sell
//   otherwise       -> None (hold band)
// t must lie in (0.5, 1] so the Buy and Sell bands cannot overlap.
//
use tracing::debug;

use crate::config::ConfigError;
use crate::domain::{Action, Window};
use crate::metrics::DECISIONS;
use crate::ports::{PredictError, Predictor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionEngine {
    threshold: f64,
}

impl DecisionEngine {
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        if !(threshold > 0.5 && threshold <= 1.0) {
            return Err(ConfigError::Threshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 { self.threshold }

    pub fn action_for(&self, score: f64) -> Action {
        if score > self.threshold {
            Action::Buy
        } else if score < 1.0 - self.threshold {
            Action::Sell
        } else {
            Action::None
        }
    }

    pub async fn decide(&self, predictor: &dyn Predictor, window: &Window) -> Result<Action, PredictError> {
        let score = predictor.predict(window.ticks()).await?;
        let action = self.action_for(score);
        debug!(score, action = action.as_str(), instrument = window.instrument(), "decision");
        DECISIONS.with_label_values(&[action.as_str()]).inc();
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SequenceBuffer;
    use crate::testkit::{tick, FakePredictor};

    fn window() -> Window {
        let mut buf = SequenceBuffer::new("PI_XBTUSD", 1);
        buf.push(tick("PI_XBTUSD", 1, 100.0, 101.0)).unwrap()
    }

    #[test]
    fn thresholds_at_or_below_half_are_rejected() {
        assert!(DecisionEngine::new(0.5).is_err());
        assert!(DecisionEngine::new(0.3).is_err());
        assert!(DecisionEngine::new(1.01).is_err());
        assert!(DecisionEngine::new(f64::NAN).is_err());
        assert!(DecisionEngine::new(1.0).is_ok());
    }

    #[tokio::test]
    async fn maps_scores_to_actions() {
        let engine = DecisionEngine::new(0.5001).unwrap();
        let w = window();
        for (score, expected) in [(0.9, Action::Buy), (0.1, Action::Sell), (0.5, Action::None)] {
            let predictor = FakePredictor::fixed(score);
            assert_eq!(engine.decide(&predictor, &w).await.unwrap(), expected);
        }
    }

    #[test]
    fn band_edges_hold() {
        let engine = DecisionEngine::new(0.75).unwrap();
        assert_eq!(engine.action_for(0.75), Action::None);
        assert_eq!(engine.action_for(0.25), Action::None);
        assert_eq!(engine.action_for(0.76), Action::Buy);
        assert_eq!(engine.action_for(0.24), Action::Sell);
    }

    #[tokio::test]
    async fn predictor_errors_propagate() {
        let engine = DecisionEngine::new(0.6).unwrap();
        let predictor = FakePredictor::failing(503);
        let err = engine.decide(&predictor, &window()).await.unwrap_err();
        assert!(matches!(err, PredictError::Status(503)));
    }
}
