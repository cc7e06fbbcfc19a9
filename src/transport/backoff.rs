//! Reconnect delay schedule shared by the TCP source and sink.

use crate::defaults;
use std::time::Duration;

/// Doubling stops after this many attempts.
const MAX_EXPONENT: u32 = 6;

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next attempt: `min(max, base * 2^(attempt-1))`.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let exponent = (self.attempt - 1).min(MAX_EXPONENT);
        self.base
            .checked_mul(1 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(defaults::RECONNECT_BASE_MS),
            Duration::from_millis(defaults::RECONNECT_MAX_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
        assert_eq!(backoff.attempt(), 8);
    }

    #[test]
    fn test_reset_restarts_at_base() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponent_cap_without_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(3600));
        let last = (0..20).map(|_| backoff.next_delay()).last().unwrap();
        assert_eq!(last, Duration::from_millis(640));
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
