// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Built-in stages.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::Result;
use crate::core::frames::{Frame, FrameSource, VideoOverrides};
use crate::core::options::{
    BlockOption, FloatOption, OptionKey, OptionRange, OPT_FILTER_MAGNITUDE,
};
use crate::core::processing::ProcessingStage;
use crate::core::streams::{StreamKind, StreamProfile};

/// Forwards every frame it is interested in, untouched. With a kind filter
/// it narrows interest to that stream kind; frames outside the filter still
/// pass through via the block's not-interested path.
pub struct PassthroughStage {
    name: String,
    kind: Option<StreamKind>,
}

impl PassthroughStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
        }
    }

    pub fn for_kind(kind: StreamKind) -> Self {
        Self {
            name: format!("{kind:?} Passthrough"),
            kind: Some(kind),
        }
    }
}

impl ProcessingStage for PassthroughStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_process(&self, frame: &Frame) -> bool {
        match self.kind {
            Some(kind) => frame.kind() == kind,
            None => true,
        }
    }

    fn process_frame(&mut self, _source: &FrameSource, _frame: &Frame) -> Result<Vec<Frame>> {
        // No results: the driver forwards the input unchanged.
        Ok(Vec::new())
    }
}

/// Nearest-neighbor downsample of video frames by an integer magnitude.
///
/// Output profiles are cached per input stream so repeated invocations keep
/// a stable lineage, which is what lets downstream frameset reassembly and
/// synchronization recognize the decimated stream across frames.
pub struct DecimationStage {
    magnitude: Arc<FloatOption>,
    profiles: HashMap<(u32, u32), StreamProfile>,
}

impl DecimationStage {
    pub fn new() -> Self {
        Self {
            magnitude: Arc::new(FloatOption::new(
                OPT_FILTER_MAGNITUDE,
                OptionRange::new(1.0, 8.0, 1.0, 2.0),
                "Decimation linear scale factor",
            )),
            profiles: HashMap::new(),
        }
    }

    fn factor(&self) -> u32 {
        (self.magnitude.query().round() as u32).max(1)
    }
}

impl Default for DecimationStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for DecimationStage {
    fn name(&self) -> &str {
        "Decimation Filter"
    }

    fn options(&self) -> Vec<(OptionKey, Arc<dyn BlockOption>)> {
        vec![(OPT_FILTER_MAGNITUDE, self.magnitude.clone())]
    }

    fn should_process(&self, frame: &Frame) -> bool {
        !frame.is_composite() && frame.as_video().is_some()
    }

    fn process_frame(&mut self, source: &FrameSource, frame: &Frame) -> Result<Vec<Frame>> {
        let factor = self.factor();
        if factor == 1 {
            return Ok(Vec::new());
        }
        let video = frame.as_video().expect("filtered to video frames");
        let out_w = (video.width() / factor).max(1);
        let out_h = (video.height() / factor).max(1);

        let in_profile = *frame.profile();
        let target = *self
            .profiles
            .entry((in_profile.uid, factor))
            .or_insert_with(|| {
                in_profile.clone_with(|p| {
                    p.width = out_w;
                    p.height = out_h;
                })
            });

        let mut out = match source.allocate_video_frame(
            target,
            Some(frame),
            VideoOverrides::default(),
        ) {
            Some(w) => w,
            // Pool shut down mid-stream: skip, input passes through.
            None => return Ok(Vec::new()),
        };

        let bytes = video.bits_per_pixel() / 8;
        let in_stride = video.stride();
        let in_data = video.data();
        let out_stride = out_w as usize * bytes;
        let out_data = out.data_mut().expect("video allocation");
        for y in 0..out_h as usize {
            let src_row = y * factor as usize * in_stride;
            let dst_row = y * out_stride;
            for x in 0..out_w as usize {
                let src = src_row + x * factor as usize * bytes;
                let dst = dst_row + x * bytes;
                out_data[dst..dst + bytes].copy_from_slice(&in_data[src..src + bytes]);
            }
        }
        Ok(vec![out.finish()])
    }
}
