// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Composite block: an ordered chain of member blocks behaving as one.

use std::sync::Arc;

use crate::core::error::{PipelineError, Result};
use crate::core::frames::Frame;
use crate::core::options::{OptionKey, OptionRange};
use crate::core::processing::{FrameSink, OptionsHolder, ProcessingBlock};

/// Fixed, ordered chain of processing blocks.
///
/// Invoking the composite invokes the first member; each member's output is
/// wired to the next at construction, and `start` wires the last member to
/// the caller's sink. Member options are exposed flat on the composite.
pub struct CompositeBlock {
    name: String,
    members: Vec<ProcessingBlock>,
}

impl CompositeBlock {
    /// Chain `members` in order. The member list is fixed for the composite's
    /// lifetime and must not be empty.
    pub fn new(name: impl Into<String>, members: Vec<ProcessingBlock>) -> Self {
        assert!(!members.is_empty(), "composite block needs at least one member");
        for pair in members.windows(2) {
            pair[0].start_shared(Arc::new(pair[1].clone()));
        }
        Self {
            name: name.into(),
            members,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(ProcessingBlock::name).collect()
    }

    /// Wire the chain's tail to `sink`.
    pub fn start(&self, sink: impl FrameSink + 'static) {
        self.start_shared(Arc::new(sink));
    }

    pub fn start_shared(&self, sink: Arc<dyn FrameSink>) {
        self.members
            .last()
            .expect("composite is never empty")
            .start_shared(sink);
    }

    pub fn invoke(&self, frame: Frame) {
        self.members
            .first()
            .expect("composite is never empty")
            .invoke(frame);
    }

    fn member_supporting(&self, key: OptionKey) -> Result<&ProcessingBlock> {
        self.members
            .iter()
            .find(|m| m.supports_option(key))
            .ok_or(PipelineError::UnsupportedOption { key })
    }
}

impl FrameSink for CompositeBlock {
    fn send(&self, frame: Frame) {
        self.invoke(frame);
    }
}

/// Bypass surface: member options read as if they were the composite's own.
/// The first member carrying a key answers for it.
impl OptionsHolder for CompositeBlock {
    fn supports_option(&self, key: OptionKey) -> bool {
        self.members.iter().any(|m| m.supports_option(key))
    }

    fn get_option(&self, key: OptionKey) -> Result<f32> {
        self.member_supporting(key)?.get_option(key)
    }

    fn set_option(&self, key: OptionKey, value: f32) -> Result<()> {
        self.member_supporting(key)?.set_option(key, value)
    }

    fn option_range(&self, key: OptionKey) -> Result<OptionRange> {
        self.member_supporting(key)?.option_range(key)
    }

    fn option_description(&self, key: OptionKey) -> Result<String> {
        self.member_supporting(key)?.option_description(key)
    }

    fn is_option_read_only(&self, key: OptionKey) -> Result<bool> {
        self.member_supporting(key)?.is_option_read_only(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frames::FramePool;
    use crate::core::options::OPT_FILTER_MAGNITUDE;
    use crate::core::processing::stages::{DecimationStage, PassthroughStage};
    use crate::core::queue::FrameQueue;
    use crate::core::streams::{PixelFormat, StreamKind, StreamProfile};

    fn depth_frame(profile: &StreamProfile) -> Frame {
        let pool = FramePool::new();
        pool.allocate_raw(profile, profile.frame_size())
            .unwrap()
            .finish()
    }

    #[test]
    fn chain_runs_members_in_order() {
        let profile = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 16, 16, 30);
        let chain = CompositeBlock::new(
            "Depth Post-Processing",
            vec![
                ProcessingBlock::new(DecimationStage::new()),
                ProcessingBlock::new(DecimationStage::new()),
            ],
        );
        let queue = FrameQueue::new(1);
        chain.start(queue.clone());

        chain.invoke(depth_frame(&profile));
        // Two halvings: 16 -> 8 -> 4.
        let out = queue.poll_for_frame().unwrap();
        assert_eq!(out.as_video().unwrap().width(), 4);
    }

    #[test]
    fn member_options_are_exposed_flat() {
        let chain = CompositeBlock::new(
            "Depth Post-Processing",
            vec![
                ProcessingBlock::new(PassthroughStage::new("Align")),
                ProcessingBlock::new(DecimationStage::new()),
            ],
        );
        assert!(chain.supports_option(OPT_FILTER_MAGNITUDE));
        chain.set_option(OPT_FILTER_MAGNITUDE, 4.0).unwrap();
        assert_eq!(chain.get_option(OPT_FILTER_MAGNITUDE).unwrap(), 4.0);
        assert!(matches!(
            chain.set_option("missing", 1.0),
            Err(PipelineError::UnsupportedOption { .. })
        ));
    }
}
