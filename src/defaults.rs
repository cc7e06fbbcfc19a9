//! Default configuration constants for framepace.
//!
//! Shared between the TOML config, the CLI and the pacing components so every
//! entry point agrees on the same frame geometry and policy limits.

/// Default sample rate in Hz.
///
/// 8kHz is the telephony rate the downstream sinks expect.
pub const SAMPLE_RATE: u32 = 8000;

/// Default frame duration in milliseconds.
///
/// Also the dispatch interval: one frame leaves every `FRAME_DURATION_MS`.
pub const FRAME_DURATION_MS: u32 = 60;

/// Bytes per sample (16-bit PCM).
pub const BYTES_PER_SAMPLE: u16 = 2;

/// Maximum number of frames waiting in the dispatch queue.
///
/// 500 frames of 60ms is 30 seconds of audio.
pub const MAX_QUEUE_LENGTH: usize = 500;

/// Accumulator ceiling as a multiple of the frame size.
pub const OVERFLOW_BUFFER_MULTIPLIER: usize = 100;

/// Lag behind the virtual timeline after which the scheduler resynchronizes.
pub const DRIFT_RECOVERY_THRESHOLD_MS: u64 = 500;

/// How long shutdown waits for queued frames to go out.
pub const DRAIN_TIMEOUT_MS: u64 = 500;

/// Default address of the upstream producer.
pub const SOURCE_ADDR: &str = "127.0.0.1:9000";

/// Default address of the fixed-cadence consumer.
pub const SINK_ADDR: &str = "127.0.0.1:9001";

/// First reconnect delay.
pub const RECONNECT_BASE_MS: u64 = 1000;

/// Reconnect delay ceiling.
pub const RECONNECT_MAX_MS: u64 = 30_000;

/// Frames buffered between the scheduler and the TCP writer task.
///
/// Kept small: the sink must not buffer on the scheduler's behalf.
pub const SINK_CHANNEL_CAPACITY: usize = 8;

/// Read buffer size for the TCP source.
pub const SOURCE_READ_BUFFER: usize = 4096;

/// Number of intervals kept for rolling timing statistics.
pub const MONITOR_WINDOW: usize = 50;
