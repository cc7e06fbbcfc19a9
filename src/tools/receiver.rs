//! Downstream simulator: reads fixed-size frames and measures their cadence.

use crate::error::Result;
use crate::pacing::monitor::{IntervalMonitor, IntervalStats};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Rolling stats are logged every this many frames.
const LOG_EVERY: u64 = 10;

/// Summary of a receiver session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiverReport {
    pub frame_size: usize,
    pub frames: u64,
    /// Frames that were entirely zero (underflow fill).
    pub silent_frames: u64,
    pub connections: u64,
    pub elapsed_ms: u64,
    pub overall: Option<IntervalStats>,
    pub recent: Option<IntervalStats>,
}

impl ReceiverReport {
    /// Multi-line human summary.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Received {} frame{} of {} bytes ({} silent) over {:.1}s",
            self.frames,
            if self.frames == 1 { "" } else { "s" },
            self.frame_size,
            self.silent_frames,
            self.elapsed_ms as f64 / 1000.0
        );
        if let Some(stats) = &self.overall {
            out.push_str(&format!(
                "\n  Avg interval: {:.2}ms\n  Jitter:       {:.2}ms (min {:.2}ms, max {:.2}ms)\n  Accuracy:     {:.1}%",
                stats.mean_ms, stats.jitter_ms, stats.min_ms, stats.max_ms, stats.accuracy_percent
            ));
        }
        out
    }
}

/// Accepts one relay connection at a time and reads exact `frame_size`
/// frames until `duration` elapses or `shutdown` changes.
pub async fn run_receiver(
    listen: &str,
    frame_size: usize,
    target_interval: Duration,
    duration: Option<Duration>,
    shutdown: watch::Receiver<bool>,
) -> Result<ReceiverReport> {
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(addr = %listener.local_addr()?, frame_size, "receiver listening");
    serve_receiver(listener, frame_size, target_interval, duration, shutdown).await
}

/// Like [`run_receiver`] on an already bound listener.
pub async fn serve_receiver(
    listener: TcpListener,
    frame_size: usize,
    target_interval: Duration,
    duration: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ReceiverReport> {
    let started = Instant::now();
    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut monitor = IntervalMonitor::new(target_interval);
    let mut silent_frames = 0u64;
    let mut connections = 0u64;
    let mut frame = vec![0u8; frame_size.max(1)];

    'accept: loop {
        if *shutdown.borrow() {
            break;
        }
        let (mut stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep_until(deadline) => break,
            accepted = listener.accept() => accepted?,
        };
        connections += 1;
        tracing::info!(%peer, "relay connected");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break 'accept,
                _ = sleep_until(deadline) => break 'accept,
                read = stream.read_exact(&mut frame) => match read {
                    Ok(_) => {
                        monitor.record(Instant::now());
                        if frame.iter().all(|&b| b == 0) {
                            silent_frames += 1;
                        }
                        if monitor.count() % LOG_EVERY == 0
                            && let Some(stats) = monitor.recent()
                        {
                            tracing::info!(
                                frames = monitor.count(),
                                avg_ms = stats.mean_ms,
                                jitter_ms = stats.jitter_ms,
                                accuracy_percent = stats.accuracy_percent,
                                "cadence"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::info!(%peer, "relay disconnected: {}", e);
                        break;
                    }
                },
            }
        }
    }

    Ok(ReceiverReport {
        frame_size,
        frames: monitor.count(),
        silent_frames,
        connections,
        elapsed_ms: started.elapsed().as_millis() as u64,
        overall: monitor.stats(),
        recent: monitor.recent(),
    })
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
