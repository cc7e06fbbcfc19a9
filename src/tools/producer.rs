//! Bursty upstream simulator.
//!
//! Serves 16-bit PCM over TCP the way a jittery network producer would:
//! irregular fragment sizes at irregular gaps, never aligned to frames.

use crate::error::{PaceError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 30000.0;

/// Audio content the producer streams.
#[derive(Debug, Clone)]
pub enum SampleSource {
    /// Endless sine tone.
    Tone { sample_rate: u32, position: u64 },
    /// WAV samples, looped.
    Looped { samples: Vec<i16>, position: usize },
}

impl SampleSource {
    pub fn tone(sample_rate: u32) -> Self {
        SampleSource::Tone {
            sample_rate,
            position: 0,
        }
    }

    /// Loads a 16-bit WAV file. Multi-channel files keep only the first channel.
    pub fn wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(PaceError::Other(format!(
                "{}: expected 16-bit integer PCM, got {}-bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }
        let channels = spec.channels.max(1) as usize;
        let samples = reader
            .samples::<i16>()
            .step_by(channels)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if samples.is_empty() {
            return Err(PaceError::Other(format!("{}: no samples", path.display())));
        }
        Ok(SampleSource::Looped {
            samples,
            position: 0,
        })
    }

    fn next_sample(&mut self) -> i16 {
        match self {
            SampleSource::Tone {
                sample_rate,
                position,
            } => {
                let t = *position as f64 / (*sample_rate).max(1) as f64;
                *position += 1;
                (TONE_AMPLITUDE * (TAU * TONE_HZ * t).sin()) as i16
            }
            SampleSource::Looped { samples, position } => {
                let sample = samples[*position % samples.len()];
                *position = (*position + 1) % samples.len();
                sample
            }
        }
    }

    /// Next `bytes` bytes of little-endian PCM. Odd lengths split a sample.
    pub fn fill(&mut self, bytes: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes + 1);
        while out.len() < bytes {
            out.extend_from_slice(&self.next_sample().to_le_bytes());
        }
        out.truncate(bytes);
        out
    }
}

/// Burst shape of the simulated producer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstProfile {
    /// Smallest burst as a multiple of the frame size.
    pub min_frames: f64,
    /// Largest burst as a multiple of the frame size.
    pub max_frames: f64,
    pub min_gap: Duration,
    pub max_gap: Duration,
}

impl Default for BurstProfile {
    fn default() -> Self {
        Self {
            min_frames: 0.5,
            max_frames: 3.0,
            min_gap: Duration::from_millis(20),
            max_gap: Duration::from_millis(60),
        }
    }
}

/// Seeded generator of (fragment, gap-before-next) pairs.
pub struct BurstGenerator {
    frame_size: usize,
    profile: BurstProfile,
    source: SampleSource,
    rng: StdRng,
}

impl BurstGenerator {
    pub fn new(frame_size: usize, profile: BurstProfile, source: SampleSource, seed: u64) -> Self {
        Self {
            frame_size,
            profile,
            source,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Produces the next burst and the delay before the one after it.
    pub fn next_burst(&mut self) -> (Vec<u8>, Duration) {
        let (lo, hi) = ordered(self.profile.min_frames, self.profile.max_frames);
        let scale = if hi > lo { self.rng.gen_range(lo..hi) } else { lo };
        let bytes = ((self.frame_size as f64 * scale) as usize).max(1);

        let (min_gap, max_gap) = (self.profile.min_gap, self.profile.max_gap.max(self.profile.min_gap));
        let gap = if max_gap > min_gap {
            self.rng.gen_range(min_gap..max_gap)
        } else {
            min_gap
        };

        (self.source.fill(bytes), gap)
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Accepts connections on `listen` and streams bursts to each client until
/// `shutdown` changes. Every client gets its own generator seeded from `seed`.
pub async fn run_producer(
    listen: &str,
    frame_size: usize,
    profile: BurstProfile,
    source: SampleSource,
    seed: u64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        frame_size,
        "producer listening"
    );
    serve_producer(listener, frame_size, profile, source, seed, &mut shutdown).await
}

/// Like [`run_producer`] on an already bound listener.
pub async fn serve_producer(
    listener: TcpListener,
    frame_size: usize,
    profile: BurstProfile,
    source: SampleSource,
    seed: u64,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut client_id: u64 = 0;
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        client_id += 1;
        tracing::info!(%peer, client_id, "producer client connected");

        let generator = BurstGenerator::new(
            frame_size,
            profile,
            source.clone(),
            seed.wrapping_add(client_id - 1),
        );
        let client_shutdown = shutdown.clone();
        tokio::spawn(async move {
            match stream_bursts(stream, generator, client_shutdown).await {
                Ok(sent) => tracing::info!(%peer, bytes = sent, "producer client finished"),
                Err(e) => tracing::info!(%peer, "producer client dropped: {}", e),
            }
        });
    }
}

async fn stream_bursts(
    mut stream: TcpStream,
    mut generator: BurstGenerator,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<u64> {
    let mut sent = 0u64;
    loop {
        let (burst, gap) = generator.next_burst();
        stream.write_all(&burst).await?;
        sent += burst.len() as u64;
        tracing::trace!(bytes = burst.len(), gap_ms = gap.as_millis() as u64, "burst sent");
        tokio::select! {
            _ = shutdown.changed() => return Ok(sent),
            _ = tokio::time::sleep(gap) => {}
        }
    }
}
