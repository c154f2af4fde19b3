//! Bounded exponential backoff for backend (re)connects

use std::time::Duration;

use rand::Rng;

/// Retry policy: `attempts` tries, delays doubling from `base` up to `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base,
            max,
        }
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }

    /// Delay before the attempt following failure number `attempt` (1-based),
    /// with up to 10% random jitter so reconnecting backends spread out.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base.saturating_mul(1u32 << exponent).min(self.max);
        let jitter_ms = (raw.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return raw;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        (raw + Duration::from_millis(jitter)).min(self.max.max(raw))
    }
}
