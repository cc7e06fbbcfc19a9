//! Frame types for the pacing pipeline.
//!
//! Defines the data that flows from the source adapter through the
//! accumulator and the dispatch queue to the sink.

use crate::defaults;
use crate::error::{PaceError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Geometry of the fixed-size frames the sink expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Samples per second.
    pub sample_rate: u32,
    /// Duration of one frame, which is also the dispatch interval.
    pub frame_duration_ms: u32,
    /// Bytes per sample (2 for 16-bit PCM).
    pub bytes_per_sample: u16,
}

impl FrameFormat {
    /// Creates a validated frame format.
    ///
    /// Rejects formats with a zero duration or whose frame size rounds to zero bytes.
    pub fn new(sample_rate: u32, frame_duration_ms: u32, bytes_per_sample: u16) -> Result<Self> {
        let format = Self {
            sample_rate,
            frame_duration_ms,
            bytes_per_sample,
        };
        if frame_duration_ms == 0 {
            return Err(PaceError::ConfigInvalidValue {
                key: "audio.frame_duration_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if format.frame_size() == 0 {
            return Err(PaceError::ConfigInvalidValue {
                key: "audio".to_string(),
                message: format!(
                    "{}Hz x {}ms x {} bytes/sample yields an empty frame",
                    sample_rate, frame_duration_ms, bytes_per_sample
                ),
            });
        }
        Ok(format)
    }

    /// Samples in one frame, rounded half up.
    pub fn samples_per_frame(&self) -> usize {
        let scaled = self.sample_rate as u64 * self.frame_duration_ms as u64;
        (scaled.saturating_add(500) / 1000) as usize
    }

    /// Size of every frame in bytes.
    pub fn frame_size(&self) -> usize {
        self.samples_per_frame()
            .saturating_mul(self.bytes_per_sample as usize)
    }

    /// Time between two dispatched frames.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
        }
    }
}

/// Immutable block of audio bytes, the unit of delivery to the sink.
///
/// Cloning shares the underlying storage, so the silence frame can be handed
/// to the sink every underflow cycle without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Arc<[u8]>,
}

impl Frame {
    /// Wraps bytes as a frame.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// All-zero frame of `size` bytes.
    pub fn silence(size: usize) -> Self {
        Self::new(vec![0u8; size])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns true if every byte is zero.
    pub fn is_silent(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    /// Returns true if both frames share the same storage.
    pub fn shares_storage(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// A message delivered by a source adapter.
///
/// Only binary payloads carry audio. Text payloads (control or metadata
/// messages on message-oriented transports) are rejected by the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw PCM bytes of arbitrary length.
    Binary(Vec<u8>),
    /// A text message.
    Text(String),
}

impl Payload {
    /// Short name of the payload kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Binary(_) => "binary",
            Payload::Text(_) => "text",
        }
    }

    /// Returns true if this is a binary payload.
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Binary(bytes.to_vec())
    }
}
