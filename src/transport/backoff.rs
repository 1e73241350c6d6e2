//! Capped exponential backoff for collector reconnects.
//!
//! The delay grows by `multiplier` after each failed attempt:
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//! and returns to `initial` once a connection succeeds or the target changes.
//! Attempts are never exhausted: a forwarder keeps trying for as long as the
//! agent runs, it only tries less often.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    /// Failed attempts since the last reset.
    attempt: u32,
}

impl ReconnectBackoff {
    /// Creates a backoff; a `multiplier` below 1.0 is treated as 1.0 (constant delay).
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier: multiplier.max(1.0),
            attempt: 0,
        }
    }

    /// Returns the delay to wait before the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.current_delay;

        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = next.min(self.max_delay);

        delay
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    /// 500 ms doubling up to 30 s.
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 2.0)
    }
}
