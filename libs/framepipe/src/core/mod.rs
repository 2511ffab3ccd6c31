// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod context;
pub mod error;
pub mod frames;
pub mod lane;
pub mod options;
pub mod processing;
pub mod queue;
pub mod streams;
pub mod sync;

pub use context::GpuContext;
pub use error::{PipelineError, Result};
pub use frames::{
    DepthView, Frame, FrameMetadata, FramePayload, FramePool, FrameSource, Frameset,
    MotionSample, PointsView, TimestampDomain, VideoOverrides, VideoView, WritableFrame,
};
pub use lane::{
    ExecutionLane, GpuObject, GpuObjectHandle, GpuSection, LaneContext, LaneRole,
};
pub use options::{
    BlockOption, FloatOption, OptionKey, OptionMap, OptionRange, OPT_ENABLED,
    OPT_FILTER_MAGNITUDE,
};
pub use processing::stages::{DecimationStage, PassthroughStage};
pub use processing::{
    BackendSelector, ChannelSink, ClosureSink, CompositeBlock, DualBlock, EnabledOptionSelector,
    FrameSink, OptionsHolder, ProcessingBlock, ProcessingStage, INFO_NAME,
};
pub use queue::FrameQueue;
pub use streams::{Extrinsics, ExtrinsicsGraph, PixelFormat, StreamKind, StreamProfile};
pub use sync::{Syncer, TimestampMatcher};
