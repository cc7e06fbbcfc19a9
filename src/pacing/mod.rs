//! Frame pacing core.
//!
//! Bursty byte fragments enter the [`FrameAccumulator`], which cuts them into
//! fixed-size frames and hands them to the [`DispatchQueue`]. The
//! [`Scheduler`] drains the queue at a fixed cadence into a [`FrameSink`],
//! substituting silence when the queue runs dry.

pub mod accumulator;
pub mod clock;
pub mod frame;
pub mod monitor;
pub mod queue;
pub mod report;
pub mod scheduler;
pub mod sink;

pub use accumulator::{AccumulatorEvent, AccumulatorObserver, ChannelObserver, FrameAccumulator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use frame::{Frame, FrameFormat, Payload};
pub use monitor::{IntervalMonitor, IntervalStats};
pub use queue::DispatchQueue;
pub use report::{CollectingReporter, Diagnostic, Reporter, Severity, TracingReporter};
pub use scheduler::{
    Dispatch, DispatchLoop, FrameOrigin, Scheduler, SchedulerConfig, SchedulerState, StatsSnapshot,
};
pub use sink::{CollectorSink, FrameSink, NullSink, SentFrame};
