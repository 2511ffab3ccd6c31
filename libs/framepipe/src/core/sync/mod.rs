// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Synchronizer: timestamp matching behind a pull-style consumer surface.

pub mod matcher;

use std::time::Duration;

pub use matcher::TimestampMatcher;

use crate::core::error::Result;
use crate::core::frames::Frame;
use crate::core::processing::{FrameSink, ProcessingBlock};
use crate::core::queue::FrameQueue;

const DEFAULT_OUTPUT_CAPACITY: usize = 16;

/// Matcher block feeding a bounded output queue: push frames from any
/// producer thread, pull matched sets from any consumer thread.
pub struct Syncer {
    block: ProcessingBlock,
    output: FrameQueue,
}

impl Syncer {
    pub fn new() -> Self {
        Self::with_output_capacity(DEFAULT_OUTPUT_CAPACITY)
    }

    /// A slow consumer loses the oldest matched sets, never stalls
    /// producers.
    pub fn with_output_capacity(capacity: usize) -> Self {
        let block = ProcessingBlock::new(TimestampMatcher::new());
        let output = FrameQueue::new(capacity);
        block.start(output.clone());
        Self { block, output }
    }

    /// Feed one frame into the matcher.
    pub fn sync(&self, frame: Frame) {
        self.block.invoke(frame);
    }

    /// Block until a matched set is available or `timeout` elapses.
    pub fn wait_for_frames(&self, timeout: Duration) -> Result<Frame> {
        self.output.wait_for_frame(timeout)
    }

    /// Non-blocking receive of the next matched set.
    pub fn poll_for_frames(&self) -> Option<Frame> {
        self.output.poll_for_frame()
    }
}

impl Default for Syncer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for Syncer {
    fn send(&self, frame: Frame) {
        self.sync(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frames::FramePool;
    use crate::core::streams::{PixelFormat, StreamKind, StreamProfile};
    use std::time::Instant;

    fn frame(profile: &StreamProfile, number: u64, timestamp_ms: i64) -> Frame {
        let pool = FramePool::new();
        let mut w = pool.allocate_raw(profile, profile.frame_size()).unwrap();
        w.metadata_mut().frame_number = number;
        w.metadata_mut().timestamp_ns = timestamp_ms * 1_000_000;
        w.finish()
    }

    #[test]
    fn sync_then_wait_returns_matched_set() {
        let depth = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30);
        let syncer = Syncer::new();
        syncer.sync(frame(&depth, 1, 1000));
        let matched = syncer
            .wait_for_frames(Duration::from_millis(100))
            .unwrap();
        assert!(matched.as_frameset().is_some());
    }

    #[test]
    fn wait_times_out_when_nothing_matches() {
        let syncer = Syncer::new();
        let start = Instant::now();
        let err = syncer
            .wait_for_frames(Duration::from_millis(100))
            .unwrap_err();
        assert!(err.is_timeout());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(500), "waited {waited:?}");
    }
}
