//! framepace - fixed-cadence frame pacing for bursty audio streams
//!
//! Re-frames arbitrarily fragmented PCM into fixed-size frames and releases
//! them to a downstream consumer one per frame interval, with drop-oldest
//! overflow, silence on underflow and drift-corrected timing.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pacing;
pub mod tools;
pub mod transport;

// Core pipeline (accumulate → queue → schedule → sink)
pub use pacing::{
    AccumulatorEvent, AccumulatorObserver, Frame, FrameAccumulator, FrameFormat, FrameSink,
    Payload, Scheduler, SchedulerConfig, SchedulerState, StatsSnapshot,
};

// Diagnostics
pub use pacing::{Diagnostic, Reporter, TracingReporter};

// Error handling
pub use error::{PaceError, Result};

// Config
pub use config::{Config, TransportKind};

// Relay
pub use app::{RelayReport, run_relay, simulate};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
