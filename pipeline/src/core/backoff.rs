//! Backoff schedule between fix attempts.

use std::time::Duration;

/// Exponential backoff bounds, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            max_ms: 30_000,
        }
    }
}

impl Backoff {
    /// Delay before fix attempt `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let ms = self.base_ms.saturating_mul(factor).min(self.max_ms);
        Duration::from_millis(ms)
    }
}
