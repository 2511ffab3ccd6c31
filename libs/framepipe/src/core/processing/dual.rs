// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Dual block: interchangeable backend implementations of one operation
//! behind a single block surface, selected per invocation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::core::error::{PipelineError, Result};
use crate::core::frames::Frame;
use crate::core::options::{OptionKey, OptionRange, OPT_ENABLED};
use crate::core::processing::{FrameSink, OptionsHolder, ProcessingBlock, INFO_NAME};

/// Strategy choosing which member handles the next invocation.
///
/// Called per frame, so a backend becoming unavailable mid-stream (lost GPU
/// context, a member downgrading its own `enabled` option) redirects the
/// very next call.
pub trait BackendSelector: Send + Sync {
    fn select(&self, members: &[ProcessingBlock]) -> usize;
}

/// Default policy: the first member whose `enabled` option reads non-zero;
/// the last member when none does, making the tail the fallback backend.
pub struct EnabledOptionSelector;

impl BackendSelector for EnabledOptionSelector {
    fn select(&self, members: &[ProcessingBlock]) -> usize {
        members
            .iter()
            .position(|m| {
                m.supports_option(OPT_ENABLED)
                    && m.get_option(OPT_ENABLED).map(|v| v > 0.0).unwrap_or(false)
            })
            .unwrap_or(members.len() - 1)
    }
}

/// Block multiplexing invocations across interchangeable member backends.
pub struct DualBlock {
    members: Vec<ProcessingBlock>,
    selector: Box<dyn BackendSelector>,
    info: RwLock<HashMap<&'static str, String>>,
}

impl DualBlock {
    /// `members` must not be empty; selection order follows list order.
    pub fn new(members: Vec<ProcessingBlock>) -> Self {
        Self::with_selector(members, EnabledOptionSelector)
    }

    pub fn with_selector(
        members: Vec<ProcessingBlock>,
        selector: impl BackendSelector + 'static,
    ) -> Self {
        assert!(!members.is_empty(), "dual block needs at least one member");
        let mut info = HashMap::new();
        info.insert(INFO_NAME, members[0].name());
        Self {
            members,
            selector: Box::new(selector),
            info: RwLock::new(info),
        }
    }

    /// Name of the most recently selected member.
    pub fn name(&self) -> String {
        self.info
            .read()
            .get(INFO_NAME)
            .cloned()
            .unwrap_or_default()
    }

    pub fn info(&self, key: &'static str) -> Option<String> {
        self.info.read().get(key).cloned()
    }

    /// Wire every member to `sink`, so whichever backend handles a frame
    /// emits to the same place.
    pub fn start(&self, sink: impl FrameSink + 'static) {
        self.start_shared(Arc::new(sink));
    }

    pub fn start_shared(&self, sink: Arc<dyn FrameSink>) {
        for member in &self.members {
            member.start_shared(sink.clone());
        }
    }

    pub fn invoke(&self, frame: Frame) {
        let selected = &self.members[self.selected()];
        selected.invoke(frame);
    }

    fn selected(&self) -> usize {
        let index = self.selector.select(&self.members).min(self.members.len() - 1);
        let name = self.members[index].name();
        let mut info = self.info.write();
        if info.get(INFO_NAME) != Some(&name) {
            debug!(backend = %name, "dual block switched backend");
            info.insert(INFO_NAME, name);
        }
        index
    }

    fn reader_for(&self, key: OptionKey) -> Result<&ProcessingBlock> {
        let selected = &self.members[self.selected()];
        if selected.supports_option(key) {
            return Ok(selected);
        }
        self.members
            .iter()
            .find(|m| m.supports_option(key))
            .ok_or(PipelineError::UnsupportedOption { key })
    }
}

impl FrameSink for DualBlock {
    fn send(&self, frame: Frame) {
        self.invoke(frame);
    }
}

/// Reads answer from the currently selected member; writes propagate to
/// every member carrying the key, so backends stay configured identically
/// and switching never loses settings.
impl OptionsHolder for DualBlock {
    fn supports_option(&self, key: OptionKey) -> bool {
        self.members.iter().any(|m| m.supports_option(key))
    }

    fn get_option(&self, key: OptionKey) -> Result<f32> {
        self.reader_for(key)?.get_option(key)
    }

    fn set_option(&self, key: OptionKey, value: f32) -> Result<()> {
        let mut any = false;
        for member in self.members.iter().filter(|m| m.supports_option(key)) {
            member.set_option(key, value)?;
            any = true;
        }
        if any {
            Ok(())
        } else {
            Err(PipelineError::UnsupportedOption { key })
        }
    }

    fn option_range(&self, key: OptionKey) -> Result<OptionRange> {
        self.reader_for(key)?.option_range(key)
    }

    fn option_description(&self, key: OptionKey) -> Result<String> {
        self.reader_for(key)?.option_description(key)
    }

    fn is_option_read_only(&self, key: OptionKey) -> Result<bool> {
        self.reader_for(key)?.is_option_read_only(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frames::{FramePool, FrameSource};
    use crate::core::options::{BlockOption, FloatOption};
    use crate::core::processing::ProcessingStage;
    use crate::core::queue::FrameQueue;
    use crate::core::streams::{PixelFormat, StreamKind, StreamProfile};

    /// Stamps the first byte of each frame so tests can tell backends apart.
    struct StampStage {
        name: &'static str,
        stamp: u8,
        enabled: Arc<FloatOption>,
    }

    impl StampStage {
        fn new(name: &'static str, stamp: u8, enabled: bool) -> Self {
            Self {
                name,
                stamp,
                enabled: Arc::new(FloatOption::new(
                    OPT_ENABLED,
                    OptionRange::boolean(enabled),
                    "Backend enabled",
                )),
            }
        }
    }

    impl ProcessingStage for StampStage {
        fn name(&self) -> &str {
            self.name
        }
        fn options(&self) -> Vec<(OptionKey, Arc<dyn BlockOption>)> {
            vec![(OPT_ENABLED, self.enabled.clone())]
        }
        fn should_process(&self, frame: &Frame) -> bool {
            frame.as_video().is_some()
        }
        fn process_frame(&mut self, source: &FrameSource, frame: &Frame) -> Result<Vec<Frame>> {
            let mut out = source
                .allocate_video_frame(*frame.profile(), Some(frame), Default::default())
                .expect("allocation");
            out.data_mut().unwrap()[0] = self.stamp;
            Ok(vec![out.finish()])
        }
    }

    fn depth_frame(profile: &StreamProfile) -> Frame {
        let pool = FramePool::new();
        pool.allocate_raw(profile, profile.frame_size())
            .unwrap()
            .finish()
    }

    fn stamped_dual(gpu_enabled: bool) -> DualBlock {
        DualBlock::new(vec![
            ProcessingBlock::new(StampStage::new("GPU Stamp", 0xA0, gpu_enabled)),
            ProcessingBlock::new(StampStage::new("CPU Stamp", 0xB0, false)),
        ])
    }

    #[test]
    fn selects_first_enabled_member() {
        let profile = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30);
        let dual = stamped_dual(true);
        let queue = FrameQueue::new(1);
        dual.start(queue.clone());
        dual.invoke(depth_frame(&profile));
        assert_eq!(queue.poll_for_frame().unwrap().data().unwrap()[0], 0xA0);
        assert_eq!(dual.name(), "GPU Stamp");
    }

    #[test]
    fn falls_back_to_last_member_when_none_enabled() {
        let profile = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30);
        let dual = stamped_dual(false);
        let queue = FrameQueue::new(1);
        dual.start(queue.clone());
        dual.invoke(depth_frame(&profile));
        assert_eq!(queue.poll_for_frame().unwrap().data().unwrap()[0], 0xB0);
        assert_eq!(dual.name(), "CPU Stamp");
    }

    #[test]
    fn disabling_mid_stream_switches_next_invocation() {
        let profile = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 4, 30);
        let dual = stamped_dual(true);
        let queue = FrameQueue::new(2);
        dual.start(queue.clone());

        dual.invoke(depth_frame(&profile));
        dual.set_option(OPT_ENABLED, 0.0).unwrap();
        dual.invoke(depth_frame(&profile));

        assert_eq!(queue.poll_for_frame().unwrap().data().unwrap()[0], 0xA0);
        assert_eq!(queue.poll_for_frame().unwrap().data().unwrap()[0], 0xB0);
    }

    #[test]
    fn set_propagates_to_all_supporting_members() {
        let dual = stamped_dual(false);
        dual.set_option(OPT_ENABLED, 1.0).unwrap();
        // Both members now read enabled; the first wins selection.
        assert_eq!(dual.get_option(OPT_ENABLED).unwrap(), 1.0);
        assert_eq!(dual.name(), "GPU Stamp");
    }
}
