//! Exponential reconnect backoff, capped, with a resettable attempt counter.

use std::time::Duration;

const CAP: Duration = Duration::from_secs(16);

#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            attempt: 0,
        }
    }

    /// Delay for the *next* attempt, then advances the counter. Forms a
    /// non-decreasing sequence bounded by [`CAP`].
    pub fn next_delay(&mut self) -> Duration {
        let multiplier = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(multiplier).min(CAP);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
