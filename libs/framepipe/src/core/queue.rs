// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded frame queue: the simplest cross-thread synchronization primitive
//! in the pipeline, used both as a public hand-off point and internally by
//! the synchronizer.
//!
//! `enqueue` never blocks; a full queue drops its oldest entry so a slow
//! consumer observes gaps in the producer, not stalls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::core::error::{PipelineError, Result};
use crate::core::frames::Frame;

struct QueueShared {
    deque: Mutex<VecDeque<Frame>>,
    available: Condvar,
    capacity: usize,
}

/// Fixed-capacity FIFO of frames. Clone is handle copy; all clones share the
/// same queue.
#[derive(Clone)]
pub struct FrameQueue {
    shared: Arc<QueueShared>,
}

impl FrameQueue {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                deque: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.deque.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.deque.lock().is_empty()
    }

    /// Hand a frame to the queue. Never blocks: at capacity the oldest
    /// unread entry is evicted first.
    pub fn enqueue(&self, frame: Frame) {
        let mut deque = self.shared.deque.lock();
        if deque.len() == self.shared.capacity {
            if let Some(dropped) = deque.pop_front() {
                debug!(
                    frame_number = dropped.frame_number(),
                    "queue full, dropping oldest frame"
                );
            }
        }
        deque.push_back(frame);
        drop(deque);
        self.shared.available.notify_one();
    }

    /// Block until a frame is available or `timeout` elapses. Timeout is the
    /// distinct retryable failure, never a hang and never a partial result.
    pub fn wait_for_frame(&self, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        let mut deque = self.shared.deque.lock();
        loop {
            if let Some(frame) = deque.pop_front() {
                return Ok(frame);
            }
            if self
                .shared
                .available
                .wait_until(&mut deque, deadline)
                .timed_out()
            {
                // One last check: the notifying enqueue may have raced the
                // deadline.
                if let Some(frame) = deque.pop_front() {
                    return Ok(frame);
                }
                return Err(PipelineError::Timeout {
                    what: "frame",
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Non-blocking receive.
    pub fn poll_for_frame(&self) -> Option<Frame> {
        self.shared.deque.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frames::FramePool;
    use crate::core::streams::{PixelFormat, StreamKind, StreamProfile};

    fn frame(number: u64) -> Frame {
        let profile = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 8, 8, 30);
        let pool = FramePool::new();
        let mut w = pool.allocate_raw(&profile, profile.frame_size()).unwrap();
        w.metadata_mut().frame_number = number;
        w.finish()
    }

    #[test]
    fn full_queue_drops_oldest_and_keeps_bound() {
        let queue = FrameQueue::new(1);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.poll_for_frame().unwrap().frame_number(), 2);
    }

    #[test]
    fn fifo_order_within_capacity() {
        let queue = FrameQueue::new(4);
        for n in 1..=3 {
            queue.enqueue(frame(n));
        }
        for n in 1..=3 {
            assert_eq!(queue.poll_for_frame().unwrap().frame_number(), n);
        }
        assert!(queue.poll_for_frame().is_none());
    }

    #[test]
    fn wait_times_out_near_deadline() {
        let queue = FrameQueue::new(1);
        let start = Instant::now();
        let err = queue.wait_for_frame(Duration::from_millis(100)).unwrap_err();
        let waited = start.elapsed();
        assert!(err.is_timeout());
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(500), "waited {waited:?}");
    }

    #[test]
    fn wait_wakes_on_cross_thread_enqueue() {
        let queue = FrameQueue::new(2);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.enqueue(frame(9));
        });
        let got = queue.wait_for_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(got.frame_number(), 9);
        handle.join().unwrap();
    }

    #[test]
    fn queue_acts_as_sink() {
        use crate::core::processing::FrameSink;
        let queue = FrameQueue::new(2);
        FrameSink::send(&queue, frame(3));
        assert_eq!(queue.len(), 1);
    }
}
