//! Exponential backoff for reconnect delays.
//!
//! Doubles the delay ceiling on every failed attempt up to a cap and draws
//! the actual delay uniformly from the full window (full jitter), so a fleet
//! of shards dropped by the same outage does not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Capped exponential backoff with full jitter.
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_bounds(BASE_DELAY, MAX_DELAY)
    }

    pub fn with_bounds(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt.
    ///
    /// The window doubles per call: attempt n draws from
    /// `[0, min(base * 2^n, max)]`.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempts.min(31);
        self.attempts = self.attempts.saturating_add(1);

        let ceiling = self
            .base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max));

        let micros = ceiling.as_micros() as u64;
        if micros == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::rng().random_range(0..=micros))
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset after a successful connection so the next outage starts small.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
