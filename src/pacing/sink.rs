use crate::error::{PaceError, Result};
use crate::pacing::clock::{Clock, SystemClock};
use crate::pacing::frame::Frame;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Pluggable frame output for the dispatch scheduler.
/// Pairs with the source adapter for input - this handles paced output.
pub trait FrameSink: Send + 'static {
    /// Hand one frame to the consumer.
    ///
    /// Must not block beyond a bounded latency. `Ok` means the frame was
    /// accepted right now, not that it was delivered.
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// A frame captured by [`CollectorSink`] with the clock time it was sent.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub frame: Frame,
    pub at: Instant,
}

/// Sink that records every frame, for tests and in-process simulation.
#[derive(Clone)]
pub struct CollectorSink {
    sent: Arc<Mutex<Vec<SentFrame>>>,
    clock: Arc<dyn Clock>,
    fail_every: Option<usize>,
    attempts: usize,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Timestamps sends with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            clock,
            fail_every: None,
            attempts: 0,
        }
    }

    /// Rejects every `n`th send (1 rejects all of them).
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Snapshot of accepted frames.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.sent().into_iter().map(|s| s.frame).collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CollectorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for CollectorSink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.attempts += 1;
        if let Some(n) = self.fail_every
            && self.attempts % n == 0
        {
            return Err(PaceError::SinkRejected {
                message: format!("collector configured to fail send #{}", self.attempts),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentFrame {
                frame: frame.clone(),
                at: self.clock.now(),
            });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Sink that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn send(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
