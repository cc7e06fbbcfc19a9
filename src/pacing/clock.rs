//! Monotonic time source and suspend primitive for the dispatch loop.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for abstracting time (enables deterministic testing).
pub trait Clock: Send + Sync {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Virtual clock that only moves when told to.
///
/// `sleep` advances virtual time instead of blocking, so a dispatch loop
/// driven by this clock runs as fast as the CPU allows while observing
/// exactly the timeline it asked for.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    /// Creates a manual clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
            slept: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

/// Rounds a delay to the nearest whole millisecond.
pub(crate) fn round_to_millis(delay: Duration) -> Duration {
    let millis = (delay.as_secs_f64() * 1000.0).round().max(0.0);
    Duration::from_millis(millis as u64)
}
