// ===============================
// src/risk.rs
// ===============================
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RiskError {
    #[error("{failures} consecutive window failures, breaker tripped")]
    ConsecutiveFailures { failures: u32 },
}

/// Contracts that may still be traded in direction `sign` without |position| exceeding `max_position`.
/// Never negative; zero means the cap is reached (or nothing was requested).
pub fn bounded_order_size(requested: i64, max_position: i64, sign: i64, current: i64) -> i64 {
    let budget = max_position.saturating_sub(sign.saturating_mul(current));
    requested.min(budget).max(0)
}

/// Counts consecutive processing failures; trips once `max_consecutive` is reached.
#[derive(Debug, Clone)]
pub struct FailureBreaker {
    max_consecutive: u32,
    consecutive: u32,
}

impl FailureBreaker {
    pub fn new(max_consecutive: u32) -> Self {
        Self { max_consecutive: max_consecutive.max(1), consecutive: 0 }
    }

    pub fn consecutive(&self) -> u32 { self.consecutive }

    pub fn record_success(&mut self) { self.consecutive = 0; }

    pub fn record_failure(&mut self) -> Result<(), RiskError> {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.max_consecutive {
            return Err(RiskError::ConsecutiveFailures { failures: self.consecutive });
        }
        warn!(consecutive = self.consecutive, limit = self.max_consecutive, "window failed");
        Ok(())
    }
}
