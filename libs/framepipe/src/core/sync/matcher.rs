// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Timestamp matcher: groups frames from independently-paced streams into
//! temporally coherent sets.

use std::collections::VecDeque;

use tracing::debug;

use crate::core::error::Result;
use crate::core::frames::{Frame, FrameSource};
use crate::core::processing::ProcessingStage;

/// A stream backing up to this many unmatched frames forces a partial set
/// out without the silent partners: their frames are not coming.
const MAX_PENDING_PER_STREAM: usize = 2;

/// Sets emitted without a stream before the matcher stops gating output
/// on it.
const DEMOTION_LAG: u32 = 3;

struct StreamState {
    lineage: u32,
    fps: u32,
    pending: VecDeque<Frame>,
    last_number: u64,
    seen: bool,
    /// Inactive streams do not gate matching; any arrival reactivates.
    active: bool,
    lag: u32,
}

/// Stage pairing frames across streams by timestamp proximity.
///
/// Streams are discovered from arriving frames (keyed by profile lineage).
/// A matched set goes out as one composite frame the moment every active
/// stream has a candidate within tolerance. A stream that stalls is first
/// worked around (its partners' backlog forces partial sets out without
/// it) and demoted once enough sets have left without it; candidates that
/// can no longer match anything are released unmatched rather than held.
pub struct TimestampMatcher {
    streams: Vec<StreamState>,
}

impl TimestampMatcher {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    /// Matching tolerance: half the frame interval of the slowest active
    /// stream, floored at 1ms.
    fn tolerance_ns(&self) -> i64 {
        let min_fps = self
            .streams
            .iter()
            .filter(|s| s.active)
            .map(|s| s.fps.max(1))
            .min()
            .unwrap_or(30);
        let ms = (500.0 / min_fps as f64).max(1.0);
        (ms * 1_000_000.0) as i64
    }

    fn stream_index(&mut self, frame: &Frame) -> usize {
        let lineage = frame.profile().lineage;
        if let Some(i) = self.streams.iter().position(|s| s.lineage == lineage) {
            return i;
        }
        self.streams.push(StreamState {
            lineage,
            fps: frame.profile().fps,
            pending: VecDeque::new(),
            last_number: 0,
            seen: false,
            active: true,
            lag: 0,
        });
        self.streams.len() - 1
    }

    fn insert(&mut self, frame: Frame) {
        let index = self.stream_index(&frame);
        let stream = &mut self.streams[index];
        let number = frame.frame_number();
        if stream.seen && number <= stream.last_number {
            debug!(
                lineage = stream.lineage,
                frame_number = number,
                "out-of-order frame dropped by matcher"
            );
            return;
        }
        stream.last_number = number;
        stream.seen = true;
        stream.active = true;
        stream.lag = 0;
        stream.pending.push_back(frame);
    }

    /// Pop matched sets while every active stream has a candidate, or while
    /// a backed-up stream forces partial sets out. Returns the sealed sets
    /// in emission order.
    fn drain_matches(&mut self, source: &FrameSource) -> Vec<Frame> {
        let mut matched = Vec::new();
        loop {
            let mut oldest: Option<(usize, i64)> = None;
            let mut newest: i64 = i64::MIN;
            let mut all_pending = true;
            let mut backlogged = false;
            for (i, stream) in self.streams.iter().enumerate() {
                if !stream.active {
                    continue;
                }
                match stream.pending.front() {
                    Some(front) => {
                        let ts = front.timestamp_ns();
                        newest = newest.max(ts);
                        if oldest.map(|(_, t)| ts < t).unwrap_or(true) {
                            oldest = Some((i, ts));
                        }
                        if stream.pending.len() >= MAX_PENDING_PER_STREAM {
                            backlogged = true;
                        }
                    }
                    None => all_pending = false,
                }
            }
            let Some((oldest_index, oldest_ts)) = oldest else {
                return matched;
            };
            // An empty stream holds the gate until a partner's backlog
            // forces a set out without it.
            if !all_pending && !backlogged {
                return matched;
            }
            if newest - oldest_ts <= self.tolerance_ns() {
                let mut children = Vec::new();
                let mut left_out = Vec::new();
                for (i, stream) in self.streams.iter_mut().enumerate() {
                    if !stream.active {
                        continue;
                    }
                    match stream.pending.pop_front() {
                        Some(frame) => children.push(frame),
                        None => left_out.push(i),
                    }
                }
                if let Some(set) = source.allocate_composite_frame(children) {
                    matched.push(set.finish());
                }
                // A set left without a stream counts against it; enough of
                // those and it stops gating output until its next frame.
                for i in left_out {
                    let stream = &mut self.streams[i];
                    stream.lag += 1;
                    if stream.lag >= DEMOTION_LAG {
                        stream.active = false;
                        debug!(lineage = stream.lineage, "silent stream stopped gating matcher");
                    }
                }
            } else {
                // The oldest candidate cannot match anything newer arriving
                // later; release it and retry.
                let stream = &mut self.streams[oldest_index];
                if let Some(stale) = stream.pending.pop_front() {
                    debug!(
                        lineage = stream.lineage,
                        frame_number = stale.frame_number(),
                        "frame outside matching tolerance, released unmatched"
                    );
                }
            }
        }
    }
}

impl Default for TimestampMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for TimestampMatcher {
    fn name(&self) -> &str {
        "Timestamp Matcher"
    }

    fn should_process(&self, _frame: &Frame) -> bool {
        true
    }

    fn process_frame(&mut self, source: &FrameSource, frame: &Frame) -> Result<Vec<Frame>> {
        self.insert(frame.clone());
        Ok(self.drain_matches(source))
    }

    /// Matched sets go out exactly as drained, one delivery each; an insert
    /// that completes no match emits nothing.
    fn prepare_output(
        &mut self,
        _source: &FrameSource,
        _input: &Frame,
        results: Vec<Frame>,
    ) -> Vec<Frame> {
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frames::FramePool;
    use crate::core::processing::ProcessingBlock;
    use crate::core::queue::FrameQueue;
    use crate::core::streams::{PixelFormat, StreamKind, StreamProfile};

    fn frame(profile: &StreamProfile, number: u64, timestamp_ms: i64) -> Frame {
        let pool = FramePool::new();
        let mut w = pool.allocate_raw(profile, profile.frame_size()).unwrap();
        w.metadata_mut().frame_number = number;
        w.metadata_mut().timestamp_ns = timestamp_ms * 1_000_000;
        w.finish()
    }

    struct Rig {
        depth: StreamProfile,
        color: StreamProfile,
        block: ProcessingBlock,
        queue: FrameQueue,
    }

    impl Rig {
        /// Matcher with both streams already discovered and drained: the
        /// first depth frame of a cold matcher goes out solo (the partner
        /// stream is not known yet), so scenarios start from a matched
        /// steady state. Stream frame numbers continue from 2, timestamps
        /// from ~103ms.
        fn primed() -> Self {
            let depth = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30);
            let color = StreamProfile::video(StreamKind::Color, 0, PixelFormat::Rgb8, 4, 4, 30);
            let block = ProcessingBlock::new(TimestampMatcher::new());
            let queue = FrameQueue::new(16);
            block.start(queue.clone());

            block.invoke(frame(&depth, 1, 100));
            block.invoke(frame(&color, 1, 102));
            block.invoke(frame(&depth, 2, 103));
            while queue.poll_for_frame().is_some() {}
            Self {
                depth,
                color,
                block,
                queue,
            }
        }

        fn depth_numbers(&self) -> Vec<u64> {
            let mut numbers = Vec::new();
            while let Some(matched) = self.queue.poll_for_frame() {
                let set = matched.as_frameset().unwrap();
                if let Some(d) = set.first_of(StreamKind::Depth) {
                    numbers.push(d.frame_number());
                }
            }
            numbers
        }
    }

    #[test]
    fn solo_stream_emits_before_partner_is_known() {
        let depth = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30);
        let block = ProcessingBlock::new(TimestampMatcher::new());
        let queue = FrameQueue::new(4);
        block.start(queue.clone());

        block.invoke(frame(&depth, 1, 1000));
        let out = queue.poll_for_frame().unwrap();
        let set = out.as_frameset().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).unwrap().frame_number(), 1);
    }

    #[test]
    fn close_timestamps_match_into_one_set() {
        let rig = Rig::primed();
        rig.block.invoke(frame(&rig.depth, 3, 1000));
        assert!(rig.queue.is_empty());
        rig.block.invoke(frame(&rig.color, 2, 1004));

        let matched = rig.queue.poll_for_frame().unwrap();
        let set = matched.as_frameset().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.first_of(StreamKind::Depth).unwrap().frame_number(), 3);
        assert_eq!(set.first_of(StreamKind::Color).unwrap().frame_number(), 2);
    }

    #[test]
    fn superseded_front_goes_out_solo_and_rest_match() {
        let rig = Rig::primed();
        // Depth 3 is a full interval behind color 2 at the 30fps tolerance
        // (~16.7ms); depth 4 backing up behind it forces it out alone, and
        // depth 4 then pairs with color 2.
        rig.block.invoke(frame(&rig.depth, 3, 1000));
        rig.block.invoke(frame(&rig.depth, 4, 1033));
        rig.block.invoke(frame(&rig.color, 2, 1035));

        let solo = rig.queue.poll_for_frame().unwrap();
        let solo_set = solo.as_frameset().unwrap();
        assert_eq!(solo_set.len(), 1);
        assert_eq!(solo_set.first_of(StreamKind::Depth).unwrap().frame_number(), 3);

        let pair = rig.queue.poll_for_frame().unwrap();
        let pair_set = pair.as_frameset().unwrap();
        assert_eq!(pair_set.len(), 2);
        assert_eq!(pair_set.first_of(StreamKind::Depth).unwrap().frame_number(), 4);
        assert_eq!(pair_set.first_of(StreamKind::Color).unwrap().frame_number(), 2);
        assert!(rig.queue.is_empty());
    }

    #[test]
    fn out_of_order_frame_is_dropped() {
        let rig = Rig::primed();
        rig.block.invoke(frame(&rig.depth, 5, 1000));
        rig.block.invoke(frame(&rig.depth, 4, 990));
        rig.block.invoke(frame(&rig.color, 2, 1002));

        let matched = rig.queue.poll_for_frame().unwrap();
        let set = matched.as_frameset().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.first_of(StreamKind::Depth).unwrap().frame_number(), 5);
    }

    #[test]
    fn backlogged_stream_forces_partial_sets_and_rejoins() {
        let rig = Rig::primed();
        // Depth goes silent while color paces; color's backlog pushes its
        // oldest frames out as color-only sets instead of stalling, and a
        // returning depth frame pairs with the newest color.
        rig.block.invoke(frame(&rig.color, 2, 1000));
        rig.block.invoke(frame(&rig.color, 3, 1033));
        rig.block.invoke(frame(&rig.color, 4, 1066));
        rig.block.invoke(frame(&rig.depth, 3, 1067));

        let mut sets = Vec::new();
        while let Some(matched) = rig.queue.poll_for_frame() {
            let set = matched.as_frameset().unwrap();
            let color = set.first_of(StreamKind::Color).unwrap().frame_number();
            sets.push((set.len(), color));
        }
        assert_eq!(sets, vec![(1, 2), (1, 3), (2, 4)]);
    }

    #[test]
    fn silent_stream_stops_gating_after_lag() {
        let rig = Rig::primed();
        // Color goes silent; depth keeps pacing. After the lag threshold the
        // matcher emits depth-only sets instead of stalling.
        for n in 3..10 {
            rig.block.invoke(frame(&rig.depth, n, 33 * n as i64 + 1000));
        }
        let numbers = rig.depth_numbers();
        assert!(!numbers.is_empty(), "depth-only output resumed");
        // Later arrivals flow straight through once the gate is lifted.
        assert!(numbers.contains(&9));
    }

    #[test]
    fn round_robin_streams_all_stay_active() {
        // Four healthy streams delivering in a fixed order every interval:
        // waiting streams must not accrue lag from arrival order alone, so
        // after discovery every set carries all four members.
        let profiles = [
            StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30),
            StreamProfile::video(StreamKind::Color, 0, PixelFormat::Rgb8, 4, 4, 30),
            StreamProfile::video(StreamKind::Infrared, 0, PixelFormat::Y8, 4, 4, 30),
            StreamProfile::video(StreamKind::Infrared, 1, PixelFormat::Y8, 4, 4, 30),
        ];
        let block = ProcessingBlock::new(TimestampMatcher::new());
        let queue = FrameQueue::new(16);
        block.start(queue.clone());

        for round in 1..=6u64 {
            for profile in &profiles {
                block.invoke(frame(profile, round, 33 * (round as i64 - 1)));
            }
        }

        let mut sizes = Vec::new();
        while let Some(matched) = queue.poll_for_frame() {
            sizes.push(matched.as_frameset().unwrap().len());
        }
        let first_full = sizes
            .iter()
            .position(|&n| n == 4)
            .expect("full sets emitted");
        assert!(
            sizes[first_full..].iter().all(|&n| n == 4),
            "a healthy stream dropped out mid-run: {sizes:?}"
        );
        assert!(sizes[first_full..].len() >= 4, "steady state too short: {sizes:?}");
    }

    #[test]
    fn delivery_sink_can_feed_the_block_again() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        use crate::core::processing::ClosureSink;

        // The matcher's sets are delivered after its turn completes, so a
        // downstream callback may invoke the same block without deadlocking
        // on the stage state.
        let depth = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30);
        let color = StreamProfile::video(StreamKind::Color, 0, PixelFormat::Rgb8, 4, 4, 30);
        let block = ProcessingBlock::new(TimestampMatcher::new());
        let queue = FrameQueue::new(4);
        let reentered = Arc::new(AtomicBool::new(false));
        {
            let inner = block.clone();
            let queue = queue.clone();
            let reentered = reentered.clone();
            block.start(ClosureSink::new(move |matched| {
                if !reentered.swap(true, Ordering::SeqCst) {
                    inner.invoke(frame(&color, 1, 5));
                }
                queue.enqueue(matched);
            }));
        }

        block.invoke(frame(&depth, 1, 0));
        assert!(reentered.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 1);
    }
}
