// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::too_many_arguments)] // Frame allocation overrides need many parameters
#![allow(clippy::type_complexity)] // Complex types are clear in context
#![allow(clippy::should_implement_trait)] // Method names like `default` are contextually clear

pub mod core;

// Re-export crossbeam_channel so channel-backed sinks can be built without
// callers pinning their own copy of the crate.
pub use crossbeam_channel;

pub use core::{
    BackendSelector,
    BlockOption,
    ChannelSink,
    ClosureSink,
    CompositeBlock,
    DecimationStage,
    DualBlock,
    EnabledOptionSelector,
    ExecutionLane,
    Extrinsics,
    ExtrinsicsGraph,
    FloatOption,
    Frame,
    FrameMetadata,
    FramePool,
    FrameQueue,
    FrameSink,
    FrameSource,
    Frameset,
    GpuContext,
    GpuObject,
    GpuObjectHandle,
    GpuSection,
    LaneContext,
    LaneRole,
    MotionSample,
    OptionKey,
    OptionMap,
    OptionRange,
    OptionsHolder,
    PassthroughStage,
    PipelineError,
    PixelFormat,
    ProcessingBlock,
    ProcessingStage,
    Result,
    StreamKind,
    StreamProfile,
    Syncer,
    TimestampDomain,
    TimestampMatcher,
    VideoOverrides,
    WritableFrame,
    INFO_NAME,
    OPT_ENABLED,
    OPT_FILTER_MAGNITUDE,
};
