//! Dispatch scheduler: releases exactly one frame per interval to the sink.
//!
//! The loop schedules against a virtual timeline (`next_send_time` advanced by
//! a fixed interval) instead of "interval after the last send", so small
//! scheduling jitter never accumulates. When the loop falls further behind
//! than the recovery threshold, the timeline jumps to now instead of
//! bursting out every missed frame.
//!
//! ```text
//!            ┌──────── wait until next_send_time (rounded to ms)
//!            ▼
//!  queue ──▶ pop ──(empty)──▶ silence
//!            │                   │
//!            └──────▶ sink.send ◀┘  (failure: report, discard)
//!                        │
//!            next_send_time += interval
//!            drift = now - next_send_time > threshold ⇒ next_send_time = now
//! ```

use crate::defaults;
use crate::error::Result;
use crate::pacing::clock::{Clock, SystemClock, round_to_millis};
use crate::pacing::frame::{Frame, FrameFormat};
use crate::pacing::queue::DispatchQueue;
use crate::pacing::report::{Diagnostic, Reporter};
use crate::pacing::sink::FrameSink;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const COMPONENT: &str = "scheduler";

type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

/// Configuration for the dispatch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between two sends.
    pub interval: Duration,
    /// Lag behind the timeline that triggers a resynchronization.
    pub drift_recovery_threshold: Duration,
    /// Bound of the dispatch queue.
    pub max_queue_length: usize,
}

impl SchedulerConfig {
    /// Scheduler pacing one frame of `format` per frame duration.
    pub fn for_format(format: &FrameFormat) -> Self {
        Self {
            interval: format.interval(),
            ..Self::default()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(defaults::FRAME_DURATION_MS as u64),
            drift_recovery_threshold: Duration::from_millis(defaults::DRIFT_RECOVERY_THRESHOLD_MS),
            max_queue_length: defaults::MAX_QUEUE_LENGTH,
        }
    }
}

/// Lifecycle of a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// Constructed, never started.
    Idle,
    /// Dispatch loop active.
    Running,
    /// Loop told to exit at its next iteration boundary.
    Stopped,
}

/// Counters updated by the dispatch loop.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    frames_sent: AtomicU64,
    silence_sent: AtomicU64,
    send_failures: AtomicU64,
    drift_recoveries: AtomicU64,
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Dispatch cycles executed.
    pub cycles: u64,
    /// Sends the sink accepted (queued and silence frames).
    pub frames_sent: u64,
    /// Cycles that found the queue empty and substituted silence.
    pub silence_sent: u64,
    /// Sends the sink rejected.
    pub send_failures: u64,
    /// Timeline resynchronizations after a stall.
    pub drift_recoveries: u64,
    /// Frames evicted from the queue by the length bound.
    pub evicted: u64,
    /// Frames refused by the queue for having the wrong size.
    pub rejected: u64,
    /// Frames waiting at snapshot time.
    pub queued: usize,
}

/// Where the frame of a cycle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    Queued,
    Silence,
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub origin: FrameOrigin,
    /// The sink accepted the frame.
    pub delivered: bool,
    /// The timeline was resynchronized after this send.
    pub resynced: bool,
}

/// One timeline of the dispatch loop.
///
/// `tick` runs one full iteration. The scheduler thread drives it
/// continuously; tests and simulations can drive it by hand.
pub struct DispatchLoop {
    queue: DispatchQueue,
    silence: Frame,
    sink: SharedSink,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    reporter: Arc<dyn Reporter>,
    stats: Arc<SchedulerStats>,
    next_send_time: Instant,
}

impl DispatchLoop {
    /// Target instant of the next send.
    pub fn next_send_time(&self) -> Instant {
        self.next_send_time
    }

    /// Suspends until `next_send_time`. This is the only suspension point.
    pub fn wait(&self) {
        let now = self.clock.now();
        if now < self.next_send_time {
            self.clock
                .sleep(round_to_millis(self.next_send_time.duration_since(now)));
        }
    }

    /// Sends one frame (or silence) and advances the timeline.
    pub fn dispatch(&mut self) -> Dispatch {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let (frame, origin) = match self.queue.pop() {
            Some(frame) => (frame, FrameOrigin::Queued),
            None => {
                self.reporter.report(COMPONENT, &Diagnostic::Underflow);
                self.stats.silence_sent.fetch_add(1, Ordering::Relaxed);
                (self.silence.clone(), FrameOrigin::Silence)
            }
        };

        let delivered = {
            let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            match sink.send(&frame) {
                Ok(()) => true,
                Err(e) => {
                    self.reporter.report(
                        COMPONENT,
                        &Diagnostic::SendFailed {
                            sink: sink.name(),
                            reason: e.to_string(),
                        },
                    );
                    false
                }
            }
        };
        if delivered {
            self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
        }

        self.next_send_time += self.config.interval;

        let now = self.clock.now();
        let mut resynced = false;
        if let Some(drift) = now.checked_duration_since(self.next_send_time)
            && drift > self.config.drift_recovery_threshold
        {
            self.reporter
                .report(COMPONENT, &Diagnostic::DriftRecovered { drift });
            self.stats.drift_recoveries.fetch_add(1, Ordering::Relaxed);
            self.next_send_time = now;
            resynced = true;
        }

        Dispatch {
            origin,
            delivered,
            resynced,
        }
    }

    /// One full iteration: wait, then dispatch.
    pub fn tick(&mut self) -> Dispatch {
        self.wait();
        self.dispatch()
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: SchedulerState,
    generation: u64,
}

fn is_current(lifecycle: &Mutex<Lifecycle>, generation: u64) -> bool {
    let lc = lifecycle.lock().unwrap_or_else(|e| e.into_inner());
    lc.state == SchedulerState::Running && lc.generation == generation
}

fn run_loop(mut dispatch: DispatchLoop, lifecycle: Arc<Mutex<Lifecycle>>, generation: u64) {
    tracing::debug!(component = COMPONENT, generation, "dispatch loop started");
    while is_current(&lifecycle, generation) {
        dispatch.wait();
        // stop() during the sleep takes effect before the next frame is picked
        if !is_current(&lifecycle, generation) {
            break;
        }
        dispatch.dispatch();
    }
    tracing::debug!(component = COMPONENT, generation, "dispatch loop exited");
}

/// Paces frames from the dispatch queue to a sink at a fixed cadence.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: DispatchQueue,
    silence: Frame,
    sink: SharedSink,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
    stats: Arc<SchedulerStats>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Creates an idle scheduler for frames of `frame_size` bytes.
    pub fn new(
        frame_size: usize,
        config: SchedulerConfig,
        sink: impl FrameSink + 'static,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config,
            queue: DispatchQueue::new(config.max_queue_length, reporter.clone())
                .with_frame_size(frame_size),
            silence: Frame::silence(frame_size),
            sink: Arc::new(Mutex::new(Box::new(sink))),
            clock: Arc::new(SystemClock),
            reporter,
            stats: Arc::new(SchedulerStats::default()),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: SchedulerState::Idle,
                generation: 0,
            })),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Sets a custom clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Producer handle to the dispatch queue.
    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Appends a frame to the dispatch queue (drop-oldest when full).
    ///
    /// Frames whose length differs from the scheduler's frame size are
    /// reported and dropped.
    pub fn enqueue(&self, frame: Frame) -> usize {
        self.queue.enqueue(frame)
    }

    /// The constant frame sent on underflow.
    pub fn silence_frame(&self) -> &Frame {
        &self.silence
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// A dispatch timeline starting now, sharing this scheduler's queue, sink and stats.
    pub fn dispatch_loop(&self) -> DispatchLoop {
        DispatchLoop {
            queue: self.queue.clone(),
            silence: self.silence.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
            config: self.config,
            reporter: self.reporter.clone(),
            stats: self.stats.clone(),
            next_send_time: self.clock.now(),
        }
    }

    /// Starts the dispatch loop on its own thread.
    ///
    /// No-op while running. After `stop`, starts a fresh timeline from now.
    pub fn start(&self) -> Result<()> {
        let generation = {
            let mut lc = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if lc.state == SchedulerState::Running {
                return Ok(());
            }
            lc.generation += 1;
            lc.state = SchedulerState::Running;
            lc.generation
        };

        self.reap_finished();

        let dispatch = self.dispatch_loop();
        let lifecycle = self.lifecycle.clone();
        let spawned = thread::Builder::new()
            .name("framepace-dispatch".to_string())
            .spawn(move || run_loop(dispatch, lifecycle, generation));

        match spawned {
            Ok(handle) => {
                self.threads
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(handle);
                tracing::info!(
                    component = COMPONENT,
                    interval_ms = self.config.interval.as_millis() as u64,
                    frame_bytes = self.silence.len(),
                    "scheduler started"
                );
                Ok(())
            }
            Err(e) => {
                self.lifecycle
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .state = SchedulerState::Stopped;
                Err(e.into())
            }
        }
    }

    /// Asks the loop to exit at its next iteration boundary. Idempotent.
    pub fn stop(&self) {
        let mut lc = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if lc.state == SchedulerState::Running {
            lc.state = SchedulerState::Stopped;
            tracing::info!(component = COMPONENT, "scheduler stopping");
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Waits for stopped loop threads to exit.
    ///
    /// Returns false without waiting while the scheduler is running.
    pub fn join(&self) -> bool {
        if self.is_running() {
            return false;
        }
        let handles: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            join_logging_panic(handle);
        }
        true
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.stats.cycles.load(Ordering::Relaxed),
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            silence_sent: self.stats.silence_sent.load(Ordering::Relaxed),
            send_failures: self.stats.send_failures.load(Ordering::Relaxed),
            drift_recoveries: self.stats.drift_recoveries.load(Ordering::Relaxed),
            evicted: self.queue.evicted_total(),
            rejected: self.queue.rejected_total(),
            queued: self.queue.len(),
        }
    }

    fn reap_finished(&self) {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let mut remaining = Vec::new();
        for handle in threads.drain(..) {
            if handle.is_finished() {
                join_logging_panic(handle);
            } else {
                remaining.push(handle);
            }
        }
        *threads = remaining;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_logging_panic(handle: JoinHandle<()>) {
    if let Err(panic_info) = handle.join() {
        let msg = panic_info
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("unknown panic");
        tracing::error!(component = COMPONENT, "dispatch thread panicked: {msg}");
    }
}
