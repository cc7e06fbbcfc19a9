//! Diagnostics and reporting for the pacing components.
//!
//! Every recoverable condition (dropped bytes, evicted frames, silence
//! substitution, failed sends, drift recovery) is handled where it is detected
//! and surfaced through a [`Reporter`] injected at construction.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// How loud a diagnostic should be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

/// A recoverable condition detected by a pacing component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Source delivered something that is not a byte payload.
    MalformedInput { kind: &'static str },
    /// Accumulator exceeded its byte ceiling; the oldest bytes were dropped.
    BufferOverflow { buffered: usize, dropped: usize },
    /// Dispatch queue exceeded its length bound; the oldest frames were evicted.
    QueueOverflow { evicted: usize, queued: usize },
    /// A frame of the wrong length was offered to the dispatch queue and dropped.
    FrameSizeMismatch { expected: usize, actual: usize },
    /// Nothing queued at dispatch time; silence was sent instead.
    Underflow,
    /// The sink refused or failed a send. The frame is discarded.
    SendFailed { sink: &'static str, reason: String },
    /// The scheduler fell too far behind and jumped its timeline to now.
    DriftRecovered { drift: Duration },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::BufferOverflow { .. } | Diagnostic::SendFailed { .. } => Severity::Error,
            Diagnostic::MalformedInput { .. }
            | Diagnostic::QueueOverflow { .. }
            | Diagnostic::FrameSizeMismatch { .. }
            | Diagnostic::Underflow
            | Diagnostic::DriftRecovered { .. } => Severity::Warn,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MalformedInput { kind } => {
                write!(f, "ignored non-binary payload ({})", kind)
            }
            Diagnostic::BufferOverflow { buffered, dropped } => write!(
                f,
                "buffer overflow: {} bytes buffered, dropped {} oldest",
                buffered, dropped
            ),
            Diagnostic::QueueOverflow { evicted, queued } => write!(
                f,
                "queue overflow: evicted {} oldest frame(s), {} queued",
                evicted, queued
            ),
            Diagnostic::FrameSizeMismatch { expected, actual } => write!(
                f,
                "dropped {}-byte frame, expected {} bytes",
                actual, expected
            ),
            Diagnostic::Underflow => write!(f, "underflow: no frame available, sending silence"),
            Diagnostic::SendFailed { sink, reason } => {
                write!(f, "send to {} failed: {}", sink, reason)
            }
            Diagnostic::DriftRecovered { drift } => write!(
                f,
                "large drift detected ({:.1}ms), recovering",
                drift.as_secs_f64() * 1000.0
            ),
        }
    }
}

/// Logging capability handed to each pacing component.
pub trait Reporter: Send + Sync {
    /// Reports a diagnostic from a component.
    fn report(&self, component: &'static str, diagnostic: &Diagnostic);
}

/// Reporter that forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, component: &'static str, diagnostic: &Diagnostic) {
        match diagnostic.severity() {
            Severity::Warn => tracing::warn!(component, "{}", diagnostic),
            Severity::Error => tracing::error!(component, "{}", diagnostic),
        }
    }
}

/// Reporter that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    entries: Mutex<Vec<(&'static str, Diagnostic)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn entries(&self) -> Vec<(&'static str, Diagnostic)> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of reported diagnostics matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, d)| predicate(d))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, component: &'static str, diagnostic: &Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((component, diagnostic.clone()));
    }
}
