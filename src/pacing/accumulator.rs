//! Frame accumulator: turns arbitrary byte fragments into fixed-size frames.
//!
//! Bytes are appended in arrival order and cut into `frame_size` frames from
//! the front. Whatever is left over (always less than one frame) waits for the
//! next push. A byte ceiling bounds memory; when it is exceeded the oldest
//! bytes are dropped so the retained audio is the most recent.

use crate::defaults;
use crate::pacing::frame::{Frame, FrameFormat, Payload};
use crate::pacing::queue::DispatchQueue;
use crate::pacing::report::{Diagnostic, Reporter};
use std::collections::VecDeque;
use std::sync::Arc;

const COMPONENT: &str = "accumulator";

/// Signals emitted by the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorEvent {
    /// A complete frame, always exactly `frame_size` bytes.
    Chunk(Frame),
    /// The byte ceiling was exceeded; carries the number of bytes dropped.
    Overflow(usize),
    /// `flush` completed.
    End,
}

impl AccumulatorEvent {
    /// Returns true if this is a Chunk event.
    pub fn is_chunk(&self) -> bool {
        matches!(self, AccumulatorEvent::Chunk(_))
    }

    /// Extracts the frame if this is a Chunk event.
    pub fn into_chunk(self) -> Option<Frame> {
        match self {
            AccumulatorEvent::Chunk(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Subscriber for accumulator events, fixed at construction.
pub trait AccumulatorObserver: Send {
    fn on_event(&mut self, event: AccumulatorEvent);
}

impl<F> AccumulatorObserver for F
where
    F: FnMut(AccumulatorEvent) + Send,
{
    fn on_event(&mut self, event: AccumulatorEvent) {
        self(event)
    }
}

/// Chunks go straight into the dispatch queue; other events are dropped.
impl AccumulatorObserver for DispatchQueue {
    fn on_event(&mut self, event: AccumulatorEvent) {
        if let AccumulatorEvent::Chunk(frame) = event {
            self.enqueue(frame);
        }
    }
}

/// Forwards every event over a crossbeam channel.
pub struct ChannelObserver {
    tx: crossbeam_channel::Sender<AccumulatorEvent>,
}

impl ChannelObserver {
    pub fn new(tx: crossbeam_channel::Sender<AccumulatorEvent>) -> Self {
        Self { tx }
    }
}

impl AccumulatorObserver for ChannelObserver {
    fn on_event(&mut self, event: AccumulatorEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(component = COMPONENT, "event receiver dropped");
        }
    }
}

/// Repackages a byte stream into fixed-size frames under bounded memory.
pub struct FrameAccumulator {
    format: FrameFormat,
    frame_size: usize,
    max_buffer_bytes: usize,
    buffer: VecDeque<u8>,
    observer: Box<dyn AccumulatorObserver>,
    reporter: Arc<dyn Reporter>,
    bytes_received: u64,
    bytes_dropped: u64,
    frames_emitted: u64,
    malformed: u64,
}

impl FrameAccumulator {
    /// Creates an accumulator with the default ceiling of
    /// `frame_size * OVERFLOW_BUFFER_MULTIPLIER` bytes.
    pub fn new(
        format: FrameFormat,
        observer: impl AccumulatorObserver + 'static,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let frame_size = format.frame_size();
        Self {
            format,
            frame_size,
            max_buffer_bytes: frame_size.saturating_mul(defaults::OVERFLOW_BUFFER_MULTIPLIER),
            buffer: VecDeque::with_capacity(frame_size.saturating_mul(2)),
            observer: Box::new(observer),
            reporter,
            bytes_received: 0,
            bytes_dropped: 0,
            frames_emitted: 0,
            malformed: 0,
        }
    }

    /// Sets the ceiling to `frame_size * multiplier` bytes, saturating at `usize::MAX`.
    pub fn with_overflow_multiplier(mut self, multiplier: usize) -> Self {
        self.max_buffer_bytes = self.frame_size.saturating_mul(multiplier);
        self
    }

    /// Sets the ceiling directly in bytes.
    ///
    /// A ceiling below one frame caps how much leftover audio may wait for
    /// the next push.
    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    /// Appends bytes and emits every complete frame.
    ///
    /// Returns the number of frames emitted.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        self.bytes_received += bytes.len() as u64;
        self.buffer.extend(bytes);

        let mut emitted = 0;
        while self.buffer.len() >= self.frame_size {
            let frame: Vec<u8> = self.buffer.drain(..self.frame_size).collect();
            self.observer.on_event(AccumulatorEvent::Chunk(Frame::new(frame)));
            emitted += 1;
        }
        self.frames_emitted += emitted as u64;

        self.enforce_ceiling();
        emitted
    }

    /// Pushes a payload from a source adapter.
    ///
    /// Non-binary payloads are reported and ignored without touching the buffer.
    pub fn push_payload(&mut self, payload: Payload) -> usize {
        match payload {
            Payload::Binary(bytes) => self.push(&bytes),
            other => {
                self.malformed += 1;
                self.reporter.report(
                    COMPONENT,
                    &Diagnostic::MalformedInput { kind: other.kind() },
                );
                0
            }
        }
    }

    /// Zero-pads leftover bytes to a frame boundary, emits the padded frame(s),
    /// then signals end of stream.
    ///
    /// Returns the number of frames emitted. The buffer is empty afterwards.
    pub fn flush(&mut self) -> usize {
        let mut emitted = 0;
        if !self.buffer.is_empty() {
            let remainder = self.buffer.len() % self.frame_size;
            if remainder != 0 {
                let padded = self.buffer.len() + self.frame_size - remainder;
                self.buffer.resize(padded, 0);
            }
            while !self.buffer.is_empty() {
                let frame: Vec<u8> = self.buffer.drain(..self.frame_size).collect();
                self.observer.on_event(AccumulatorEvent::Chunk(Frame::new(frame)));
                emitted += 1;
            }
            self.frames_emitted += emitted as u64;
        }
        self.observer.on_event(AccumulatorEvent::End);
        emitted
    }

    fn enforce_ceiling(&mut self) {
        let buffered = self.buffer.len();
        if buffered <= self.max_buffer_bytes {
            return;
        }

        // Drop-oldest without realigning to a frame boundary.
        let dropped = buffered - self.max_buffer_bytes;
        self.reporter
            .report(COMPONENT, &Diagnostic::BufferOverflow { buffered, dropped });
        self.observer.on_event(AccumulatorEvent::Overflow(dropped));
        self.buffer.drain(..dropped);
        self.bytes_dropped += dropped as u64;
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }

    /// Bytes waiting for the next frame boundary.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Number of rejected non-binary payloads.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::report::CollectingReporter;
    use std::sync::Mutex;

    type Events = Arc<Mutex<Vec<AccumulatorEvent>>>;

    fn recording() -> (Events, impl AccumulatorObserver + 'static) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |e: AccumulatorEvent| sink.lock().unwrap().push(e))
    }

    fn make_accumulator() -> (FrameAccumulator, Events, Arc<CollectingReporter>) {
        let (events, observer) = recording();
        let reporter = Arc::new(CollectingReporter::new());
        let acc = FrameAccumulator::new(FrameFormat::default(), observer, reporter.clone());
        (acc, events, reporter)
    }

    fn chunks(events: &Events) -> Vec<Frame> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.clone().into_chunk())
            .collect()
    }

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_2000_bytes_yield_two_frames_and_80_leftover() {
        let (mut acc, events, _) = make_accumulator();
        assert_eq!(acc.frame_size(), 960);

        let emitted = acc.push(&ramp(2000));

        assert_eq!(emitted, 2);
        let frames = chunks(&events);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 960));
        assert_eq!(acc.buffered_len(), 80);
        assert_eq!(acc.frames_emitted(), 2);
    }

    #[test]
    fn test_below_threshold_emits_nothing() {
        let (mut acc, events, _) = make_accumulator();
        for _ in 0..9 {
            assert_eq!(acc.push(&[1u8; 100]), 0);
        }
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(acc.buffered_len(), 900);

        // The 10th push crosses 960
        assert_eq!(acc.push(&[1u8; 100]), 1);
        assert_eq!(acc.buffered_len(), 40);
    }

    #[test]
    fn test_order_preserved_across_irregular_pushes() {
        let (mut acc, events, _) = make_accumulator();
        let input = ramp(960 * 7 + 123);

        // Irregular fragment sizes, including empty ones
        let sizes = [1usize, 0, 959, 2, 1500, 3000, 17, 0, 480];
        let mut offset = 0;
        let mut i = 0;
        while offset < input.len() {
            let len = sizes[i % sizes.len()].min(input.len() - offset);
            acc.push(&input[offset..offset + len]);
            offset += len;
            i += 1;
        }

        let frames = chunks(&events);
        assert_eq!(frames.len(), 7);
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect();
        assert_eq!(&joined[..], &input[..960 * 7]);
        let leftover: Vec<u8> = acc.buffer.iter().copied().collect();
        assert_eq!(&leftover[..], &input[960 * 7..]);
    }

    #[test]
    fn test_flush_pads_100_bytes_with_860_zeros_then_ends() {
        let (mut acc, events, _) = make_accumulator();
        acc.push(&[7u8; 100]);

        let emitted = acc.flush();

        assert_eq!(emitted, 1);
        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        let frame = events[0].clone().into_chunk().unwrap();
        assert_eq!(frame.len(), 960);
        assert!(frame.as_bytes()[..100].iter().all(|&b| b == 7));
        assert!(frame.as_bytes()[100..].iter().all(|&b| b == 0));
        assert_eq!(events[1], AccumulatorEvent::End);
        assert_eq!(acc.buffered_len(), 0);
    }

    #[test]
    fn test_flush_on_empty_buffer_only_ends() {
        let (mut acc, events, _) = make_accumulator();
        assert_eq!(acc.flush(), 0);
        assert_eq!(*events.lock().unwrap(), vec![AccumulatorEvent::End]);
    }

    #[test]
    fn test_push_after_flush_starts_clean() {
        let (mut acc, events, _) = make_accumulator();
        acc.push(&[1u8; 10]);
        acc.flush();
        events.lock().unwrap().clear();

        acc.push(&[2u8; 960]);
        let frames = chunks(&events);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].as_bytes().iter().all(|&b| b == 2));
    }

    #[test]
    fn test_default_ceiling_is_100_frames() {
        let (acc, _, _) = make_accumulator();
        assert_eq!(acc.max_buffer_bytes(), 96_000);
        let (_, observer) = recording();
        let acc = FrameAccumulator::new(
            FrameFormat::default(),
            observer,
            Arc::new(CollectingReporter::new()),
        )
        .with_overflow_multiplier(3);
        assert_eq!(acc.max_buffer_bytes(), 2880);
    }

    #[test]
    fn test_huge_multiplier_saturates_ceiling() {
        let (_, observer) = recording();
        let mut acc = FrameAccumulator::new(
            FrameFormat::default(),
            observer,
            Arc::new(CollectingReporter::new()),
        )
        .with_overflow_multiplier(usize::MAX / 2);
        assert_eq!(acc.max_buffer_bytes(), usize::MAX);
        assert_eq!(acc.push(&ramp(2000)), 2);
        assert_eq!(acc.bytes_dropped(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest_bytes() {
        let (events, observer) = recording();
        let reporter = Arc::new(CollectingReporter::new());
        let mut acc = FrameAccumulator::new(FrameFormat::default(), observer, reporter.clone())
            .with_max_buffer_bytes(50);

        let input = ramp(100);
        assert_eq!(acc.push(&input), 0);

        assert_eq!(*events.lock().unwrap(), vec![AccumulatorEvent::Overflow(50)]);
        assert_eq!(acc.buffered_len(), 50);
        let retained: Vec<u8> = acc.buffer.iter().copied().collect();
        assert_eq!(&retained[..], &input[50..]);
        assert_eq!(acc.bytes_dropped(), 50);
        assert_eq!(
            reporter.entries(),
            vec![(
                "accumulator",
                Diagnostic::BufferOverflow {
                    buffered: 100,
                    dropped: 50
                }
            )]
        );
    }

    #[test]
    fn test_overflow_bound_holds_after_every_push() {
        let (_, observer) = recording();
        let mut acc = FrameAccumulator::new(
            FrameFormat::default(),
            observer,
            Arc::new(CollectingReporter::new()),
        )
        .with_max_buffer_bytes(300);

        for len in [10usize, 500, 2000, 959, 1, 961, 299, 301] {
            acc.push(&ramp(len));
            assert!(acc.buffered_len() <= 300);
        }
    }

    #[test]
    fn test_overflow_does_not_realign_to_frame_boundary() {
        let (events, observer) = recording();
        let mut acc = FrameAccumulator::new(
            FrameFormat::new(8000, 1, 2).unwrap(),
            observer,
            Arc::new(CollectingReporter::new()),
        )
        .with_max_buffer_bytes(5);
        assert_eq!(acc.frame_size(), 16);

        acc.push(&ramp(15));
        assert_eq!(acc.buffered_len(), 5);
        acc.push(&ramp(11));

        // 5 retained (10..15) + 11 new bytes form the next frame
        let frames = chunks(&events);
        assert_eq!(frames.len(), 1);
        let mut expected: Vec<u8> = (10u8..15).collect();
        expected.extend(ramp(11));
        assert_eq!(frames[0].as_bytes(), &expected[..]);
    }

    #[test]
    fn test_malformed_payload_ignored() {
        let (mut acc, events, reporter) = make_accumulator();
        acc.push(&[1u8; 10]);

        let emitted = acc.push_payload(Payload::Text("not audio".to_string()));

        assert_eq!(emitted, 0);
        assert_eq!(acc.buffered_len(), 10);
        assert_eq!(acc.bytes_received(), 10);
        assert_eq!(acc.malformed_count(), 1);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(
            reporter.entries(),
            vec![("accumulator", Diagnostic::MalformedInput { kind: "text" })]
        );
    }

    #[test]
    fn test_binary_payload_pushed() {
        let (mut acc, events, reporter) = make_accumulator();
        assert_eq!(acc.push_payload(Payload::Binary(vec![3u8; 1000])), 1);
        assert_eq!(chunks(&events).len(), 1);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_dispatch_queue_as_observer() {
        let reporter = Arc::new(CollectingReporter::new());
        let queue = DispatchQueue::new(10, reporter.clone());
        let mut acc = FrameAccumulator::new(FrameFormat::default(), queue.clone(), reporter);

        acc.push(&[9u8; 960 * 3 + 5]);
        acc.flush();

        assert_eq!(queue.len(), 4);
        assert!(std::iter::from_fn(|| queue.pop()).all(|f| f.len() == 960));
    }

    #[test]
    fn test_channel_observer_forwards_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut acc = FrameAccumulator::new(
            FrameFormat::default(),
            ChannelObserver::new(tx),
            Arc::new(CollectingReporter::new()),
        );

        acc.push(&[1u8; 960]);
        acc.flush();

        assert!(rx.try_recv().unwrap().is_chunk());
        assert_eq!(rx.try_recv().unwrap(), AccumulatorEvent::End);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let mut acc = FrameAccumulator::new(
            FrameFormat::default(),
            ChannelObserver::new(tx),
            Arc::new(CollectingReporter::new()),
        );
        assert_eq!(acc.push(&[1u8; 960]), 1);
    }
}
