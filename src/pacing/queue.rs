//! Bounded FIFO of frames waiting for dispatch.
//!
//! The queue is the only state shared between the producer path (accumulator
//! emissions) and the consumer path (the dispatch loop). Producers never block:
//! when the bound is exceeded the oldest frames are evicted. A queue bound to
//! a frame size refuses frames of any other length, so the sink only ever
//! sees whole frames.

use crate::pacing::frame::Frame;
use crate::pacing::report::{Diagnostic, Reporter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const COMPONENT: &str = "queue";

/// Cloneable handle to a drop-oldest bounded frame queue.
#[derive(Clone)]
pub struct DispatchQueue {
    frames: Arc<Mutex<VecDeque<Frame>>>,
    capacity: usize,
    frame_size: Option<usize>,
    evicted: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    reporter: Arc<dyn Reporter>,
}

impl DispatchQueue {
    /// Creates a queue holding at most `capacity` frames (at least one).
    pub fn new(capacity: usize, reporter: Arc<dyn Reporter>) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
            frame_size: None,
            evicted: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
            reporter,
        }
    }

    /// Only accept frames of exactly `frame_size` bytes.
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = Some(frame_size);
        self
    }

    /// Appends a frame, evicting from the head until the bound holds.
    ///
    /// Returns the number of frames evicted by this call. A frame of the
    /// wrong size is reported and dropped without touching the queue.
    pub fn enqueue(&self, frame: Frame) -> usize {
        if let Some(expected) = self.frame_size
            && frame.len() != expected
        {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            self.reporter.report(
                COMPONENT,
                &Diagnostic::FrameSizeMismatch {
                    expected,
                    actual: frame.len(),
                },
            );
            return 0;
        }

        let (evicted, queued) = {
            let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
            frames.push_back(frame);
            let mut evicted = 0;
            while frames.len() > self.capacity {
                frames.pop_front();
                evicted += 1;
            }
            (evicted, frames.len())
        };

        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            self.reporter
                .report(COMPONENT, &Diagnostic::QueueOverflow { evicted, queued });
        }
        evicted
    }

    /// Removes and returns the oldest frame.
    pub fn pop(&self) -> Option<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted since creation.
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Total frames refused for having the wrong size.
    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    /// Drops every queued frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = frames.len();
        frames.clear();
        dropped
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("evicted", &self.evicted_total())
            .field("rejected", &self.rejected_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::report::CollectingReporter;

    fn numbered(n: u32) -> Frame {
        Frame::new(n.to_le_bytes().to_vec())
    }

    fn number_of(frame: &Frame) -> u32 {
        let bytes: [u8; 4] = frame.as_bytes().try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    #[test]
    fn test_fifo_order() {
        let queue = DispatchQueue::new(10, Arc::new(CollectingReporter::new()));
        for n in 0..3 {
            queue.enqueue(numbered(n));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(number_of(&queue.pop().unwrap()), 0);
        assert_eq!(number_of(&queue.pop().unwrap()), 1);
        assert_eq!(number_of(&queue.pop().unwrap()), 2);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_501_enqueues_keep_newest_500() {
        let reporter = Arc::new(CollectingReporter::new());
        let queue = DispatchQueue::new(500, reporter.clone());

        for n in 0..501 {
            queue.enqueue(numbered(n));
        }

        assert_eq!(queue.len(), 500);
        assert_eq!(queue.evicted_total(), 1);
        // The first enqueued frame is gone; the head is the second one
        assert_eq!(number_of(&queue.pop().unwrap()), 1);
        assert_eq!(
            reporter.entries(),
            vec![(
                "queue",
                Diagnostic::QueueOverflow {
                    evicted: 1,
                    queued: 500
                }
            )]
        );
    }

    #[test]
    fn test_bound_holds_under_sustained_overflow() {
        let queue = DispatchQueue::new(4, Arc::new(CollectingReporter::new()));
        for n in 0..100 {
            queue.enqueue(numbered(n));
            assert!(queue.len() <= 4);
        }
        let retained: Vec<u32> = std::iter::from_fn(|| queue.pop())
            .map(|f| number_of(&f))
            .collect();
        assert_eq!(retained, vec![96, 97, 98, 99]);
        assert_eq!(queue.evicted_total(), 96);
    }

    #[test]
    fn test_enqueue_returns_evicted_count() {
        let queue = DispatchQueue::new(1, Arc::new(CollectingReporter::new()));
        assert_eq!(queue.enqueue(numbered(0)), 0);
        assert_eq!(queue.enqueue(numbered(1)), 1);
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let queue = DispatchQueue::new(0, Arc::new(CollectingReporter::new()));
        assert_eq!(queue.capacity(), 1);
        queue.enqueue(numbered(7));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let queue = DispatchQueue::new(8, Arc::new(CollectingReporter::new()));
        let producer = queue.clone();
        producer.enqueue(numbered(42));
        assert_eq!(number_of(&queue.pop().unwrap()), 42);
    }

    #[test]
    fn test_wrong_size_frames_rejected() {
        let reporter = Arc::new(CollectingReporter::new());
        let queue = DispatchQueue::new(8, reporter.clone()).with_frame_size(4);

        queue.enqueue(numbered(1));
        assert_eq!(queue.enqueue(Frame::new(vec![0u8; 3])), 0);
        queue.enqueue(Frame::new(vec![0u8; 5]));
        queue.enqueue(numbered(2));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.rejected_total(), 2);
        assert_eq!(queue.evicted_total(), 0);
        assert_eq!(number_of(&queue.pop().unwrap()), 1);
        assert_eq!(number_of(&queue.pop().unwrap()), 2);
        assert_eq!(
            reporter.entries()[0],
            (
                "queue",
                Diagnostic::FrameSizeMismatch {
                    expected: 4,
                    actual: 3
                }
            )
        );
    }

    #[test]
    fn test_unbound_queue_accepts_any_size() {
        let queue = DispatchQueue::new(8, Arc::new(CollectingReporter::new()));
        queue.enqueue(Frame::new(vec![0u8; 3]));
        queue.enqueue(Frame::new(vec![0u8; 7]));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.frame_size(), None);
    }

    #[test]
    fn test_clear() {
        let queue = DispatchQueue::new(8, Arc::new(CollectingReporter::new()));
        queue.enqueue(numbered(1));
        queue.enqueue(numbered(2));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_respect_bound() {
        let queue = DispatchQueue::new(50, Arc::new(CollectingReporter::new()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        q.enqueue(numbered(t * 1000 + n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 50);
        assert_eq!(queue.evicted_total(), 350);
    }
}
