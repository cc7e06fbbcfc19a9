//! Relay composition root.
//!
//! Wires source → accumulator → dispatch queue → scheduler → sink:
//! bursty producer in, fixed-cadence consumer out, over TCP or WebSocket.

use crate::config::Config;
use crate::error::{PaceError, Result};
use crate::pacing::accumulator::{AccumulatorEvent, FrameAccumulator};
use crate::pacing::clock::ManualClock;
use crate::pacing::monitor::{IntervalMonitor, IntervalStats};
use crate::pacing::queue::DispatchQueue;
use crate::pacing::report::{CollectingReporter, Diagnostic, Reporter, TracingReporter};
use crate::pacing::scheduler::{Scheduler, StatsSnapshot};
use crate::pacing::sink::CollectorSink;
use crate::transport::{RelaySink, RelaySource, SourceStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Observer that feeds chunks to the dispatch queue and logs the rest.
fn queue_observer(queue: DispatchQueue) -> impl FnMut(AccumulatorEvent) + Send + 'static {
    move |event: AccumulatorEvent| match event {
        AccumulatorEvent::Chunk(frame) => {
            queue.enqueue(frame);
        }
        AccumulatorEvent::Overflow(dropped) => {
            tracing::debug!(dropped, "accumulator dropped oldest bytes");
        }
        AccumulatorEvent::End => tracing::debug!("accumulator flushed"),
    }
}

/// Totals of one relay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub scheduler: StatsSnapshot,
    pub connections: u64,
    pub bytes_in: u64,
    pub bytes_dropped: u64,
    /// Source messages rejected as non-audio.
    pub malformed: u64,
}

/// Runs the relay until `shutdown` changes, then shuts down gracefully:
/// flush the partial frame, give the queue `drain_timeout` to empty, stop the
/// scheduler and close the sink.
pub async fn run_relay(config: &Config, shutdown: watch::Receiver<bool>) -> Result<RelayReport> {
    config.validate()?;
    let format = config.frame_format()?;
    let reporter: Arc<dyn Reporter> = Arc::new(TracingReporter);

    let sink = RelaySink::connect(&config.transport, config.backoff())?;
    let scheduler = Scheduler::new(
        format.frame_size(),
        config.scheduler_config(),
        sink.clone(),
        reporter.clone(),
    );
    let queue = scheduler.queue();
    let mut accumulator =
        FrameAccumulator::new(format, queue_observer(queue.clone()), reporter.clone())
            .with_overflow_multiplier(config.pacing.overflow_buffer_multiplier);

    tracing::info!(
        transport = %config.transport.kind,
        source = %config.transport.source_addr,
        sink = %config.transport.sink_addr,
        sample_rate = format.sample_rate,
        frame_ms = format.frame_duration_ms,
        frame_bytes = format.frame_size(),
        "relay starting"
    );

    scheduler.start()?;

    let mut source = RelaySource::new(
        config.transport.kind,
        &config.transport.source_addr,
        config.backoff(),
    );
    let source_stats: SourceStats = source
        .run(
            |payload| {
                accumulator.push_payload(payload);
            },
            shutdown,
        )
        .await;

    let flushed = accumulator.flush();
    tracing::debug!(flushed, "flushed partial frame");

    let remaining = drain(&queue, config.drain_timeout()).await;
    if remaining > 0 {
        tracing::warn!(remaining, "drain timeout, discarding queued frames");
        queue.clear();
    }

    scheduler.stop();
    let stats = tokio::task::spawn_blocking(move || {
        scheduler.join();
        scheduler.stats()
    })
    .await
    .map_err(|e| PaceError::Other(format!("scheduler join failed: {}", e)))?;

    sink.close().await;

    let report = RelayReport {
        scheduler: stats,
        connections: source_stats.connections,
        bytes_in: source_stats.bytes,
        bytes_dropped: accumulator.bytes_dropped(),
        malformed: accumulator.malformed_count(),
    };
    tracing::info!(
        connections = report.connections,
        bytes_in = report.bytes_in,
        bytes_dropped = report.bytes_dropped,
        malformed = report.malformed,
        frames_sent = stats.frames_sent,
        silence_sent = stats.silence_sent,
        send_failures = stats.send_failures,
        evicted = stats.evicted,
        drift_recoveries = stats.drift_recoveries,
        "relay stopped"
    );
    Ok(report)
}

/// Polls until the queue is empty or `timeout` passes. Returns what is left.
async fn drain(queue: &DispatchQueue, timeout: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = queue.len();
        if remaining == 0 || tokio::time::Instant::now() >= deadline {
            return remaining;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

/// A one-off pause injected into a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall {
    /// Cycle before which the pause happens.
    pub at_cycle: usize,
    pub duration: Duration,
}

/// Result of an in-process simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub frame_size: usize,
    pub cycles: usize,
    pub frames_emitted: u64,
    pub bytes_dropped: u64,
    pub scheduler: StatsSnapshot,
    pub timing: Option<IntervalStats>,
    pub underflows: usize,
    pub queue_overflows: usize,
    pub drift_recoveries: usize,
}

/// Runs the pipeline on virtual time.
///
/// Each cycle pushes the next input fragment (if any) into the accumulator
/// and then runs one dispatch iteration. Remaining input is flushed after the
/// last cycle without being dispatched.
pub fn simulate(
    config: &Config,
    fragments: impl IntoIterator<Item = Vec<u8>>,
    cycles: usize,
    stall: Option<Stall>,
) -> Result<SimulationReport> {
    config.validate()?;
    let format = config.frame_format()?;
    let clock = ManualClock::new();
    let diagnostics = Arc::new(CollectingReporter::new());
    let sink = CollectorSink::with_clock(Arc::new(clock.clone()));

    let scheduler = Scheduler::new(
        format.frame_size(),
        config.scheduler_config(),
        sink.clone(),
        diagnostics.clone(),
    )
    .with_clock(Arc::new(clock.clone()));
    let mut accumulator =
        FrameAccumulator::new(format, scheduler.queue(), diagnostics.clone())
            .with_overflow_multiplier(config.pacing.overflow_buffer_multiplier);

    let mut fragments = fragments.into_iter();
    let mut dispatch = scheduler.dispatch_loop();
    for cycle in 0..cycles {
        if let Some(fragment) = fragments.next() {
            accumulator.push(&fragment);
        }
        if let Some(stall) = stall
            && stall.at_cycle == cycle
        {
            clock.advance(stall.duration);
        }
        dispatch.tick();
    }
    accumulator.flush();

    let mut monitor = IntervalMonitor::new(format.interval());
    for sent in sink.sent() {
        monitor.record(sent.at);
    }

    let count = |pred: fn(&Diagnostic) -> bool| diagnostics.count(pred);
    Ok(SimulationReport {
        frame_size: format.frame_size(),
        cycles,
        frames_emitted: accumulator.frames_emitted(),
        bytes_dropped: accumulator.bytes_dropped(),
        scheduler: scheduler.stats(),
        timing: monitor.stats(),
        underflows: count(|d| matches!(d, Diagnostic::Underflow)),
        queue_overflows: count(|d| matches!(d, Diagnostic::QueueOverflow { .. })),
        drift_recoveries: count(|d| matches!(d, Diagnostic::DriftRecovered { .. })),
    })
}
