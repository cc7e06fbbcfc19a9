//! Inter-arrival timing statistics for a paced stream.

use crate::defaults;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Aggregated interval statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalStats {
    /// Arrivals recorded.
    pub count: u64,
    /// Intervals the statistics cover.
    pub intervals: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Spread between the slowest and fastest interval.
    pub jitter_ms: f64,
    /// `(target - |target - mean|) / target * 100`.
    pub accuracy_percent: f64,
}

/// Records arrival instants and summarizes the gaps between them.
#[derive(Debug)]
pub struct IntervalMonitor {
    target: Duration,
    window: usize,
    last: Option<Instant>,
    count: u64,
    recent: VecDeque<Duration>,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl IntervalMonitor {
    pub fn new(target: Duration) -> Self {
        Self::with_window(target, defaults::MONITOR_WINDOW)
    }

    /// Keeps the last `window` intervals for [`recent`](Self::recent).
    pub fn with_window(target: Duration, window: usize) -> Self {
        let window = window.max(1);
        Self {
            target,
            window,
            last: None,
            count: 0,
            recent: VecDeque::with_capacity(window),
            total: Duration::ZERO,
            min: None,
            max: None,
        }
    }

    /// Records one arrival. Returns the interval since the previous one.
    pub fn record(&mut self, at: Instant) -> Option<Duration> {
        self.count += 1;
        let previous = self.last.replace(at)?;
        let interval = at.saturating_duration_since(previous);

        self.total += interval;
        self.min = Some(self.min.map_or(interval, |m| m.min(interval)));
        self.max = Some(self.max.map_or(interval, |m| m.max(interval)));

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(interval);
        Some(interval)
    }

    /// Arrivals recorded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    /// Statistics over every interval since creation.
    pub fn stats(&self) -> Option<IntervalStats> {
        let (min, max) = (self.min?, self.max?);
        let intervals = self.count.saturating_sub(1) as usize;
        let mean = self.total.as_secs_f64() / intervals as f64;
        Some(self.summarize(intervals, mean, min, max))
    }

    /// Statistics over the rolling window.
    pub fn recent(&self) -> Option<IntervalStats> {
        let min = *self.recent.iter().min()?;
        let max = *self.recent.iter().max()?;
        let sum: Duration = self.recent.iter().sum();
        let mean = sum.as_secs_f64() / self.recent.len() as f64;
        Some(self.summarize(self.recent.len(), mean, min, max))
    }

    fn summarize(&self, intervals: usize, mean: f64, min: Duration, max: Duration) -> IntervalStats {
        IntervalStats {
            count: self.count,
            intervals,
            mean_ms: mean * 1000.0,
            min_ms: to_ms(min),
            max_ms: to_ms(max),
            jitter_ms: to_ms(max - min),
            accuracy_percent: accuracy(self.target, mean),
        }
    }
}

fn to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn accuracy(target: Duration, mean_secs: f64) -> f64 {
    let target = target.as_secs_f64();
    if target == 0.0 {
        return 0.0;
    }
    (target - (target - mean_secs).abs()) / target * 100.0
}
