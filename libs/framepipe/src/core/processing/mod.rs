// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Processing blocks: named pipeline stages wired into a directed graph of
//! explicit sink edges.
//!
//! A stage implements [`ProcessingStage`]; the surrounding
//! [`ProcessingBlock`] drives the per-invocation state machine
//! (filter -> process -> emit), applies the default frameset reassembly
//! policy, and exposes the uniform Option/Info surface. Stage failures are
//! local: the input passes through unchanged and streaming continues.

pub mod composite;
pub mod dual;
pub mod stages;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

pub use composite::CompositeBlock;
pub use dual::{BackendSelector, DualBlock, EnabledOptionSelector};

use crate::core::error::Result;
use crate::core::frames::{Frame, FramePool, FrameSource, WritableFrame};
use crate::core::options::{BlockOption, OptionKey, OptionMap, OptionRange};
use crate::core::queue::FrameQueue;

/// Info key for a block's display name.
pub const INFO_NAME: &str = "name";

/// Downstream edge of a block: a place finished frames are handed to,
/// synchronously, on the invoking thread.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Frame);
}

/// Sink wrapping a plain function or closure.
pub struct ClosureSink<F>(F);

impl<F> ClosureSink<F>
where
    F: Fn(Frame) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> FrameSink for ClosureSink<F>
where
    F: Fn(Frame) + Send + Sync,
{
    fn send(&self, frame: Frame) {
        (self.0)(frame)
    }
}

/// Sink feeding a crossbeam channel. A full or disconnected channel drops
/// the frame (the consumer observes a gap, the producer never stalls).
pub struct ChannelSink(crossbeam_channel::Sender<Frame>);

impl ChannelSink {
    pub fn new(sender: crossbeam_channel::Sender<Frame>) -> Self {
        Self(sender)
    }
}

impl FrameSink for ChannelSink {
    fn send(&self, frame: Frame) {
        if let Err(e) = self.0.try_send(frame) {
            debug!("channel sink dropped frame: {e}");
        }
    }
}

impl FrameSink for FrameQueue {
    fn send(&self, frame: Frame) {
        self.enqueue(frame);
    }
}

/// The behavior of one pipeline stage.
pub trait ProcessingStage: Send {
    fn name(&self) -> &str;

    /// Options this stage carries; registered on the owning block at
    /// construction.
    fn options(&self) -> Vec<(OptionKey, Arc<dyn BlockOption>)> {
        Vec::new()
    }

    /// Cheap, side-effect-free interest predicate. Frames failing it are
    /// forwarded unchanged, never silently dropped.
    fn should_process(&self, frame: &Frame) -> bool;

    /// Compute zero or more output frames. Must not block on I/O; GPU-backed
    /// stages guard device access behind their lane's `perform_gpu_action`.
    fn process_frame(&mut self, source: &FrameSource, frame: &Frame) -> Result<Vec<Frame>>;

    /// Assemble what the block emits, one delivery per returned frame, all
    /// of them sent after the stage's turn completes. The default
    /// reassembles framesets (untouched siblings + results replacing
    /// children of matching lineage) and forwards the input when there are
    /// no results; stages whose output identity differs from 1:1 override
    /// this. Returning an empty vec emits nothing for this invocation.
    fn prepare_output(
        &mut self,
        source: &FrameSource,
        input: &Frame,
        results: Vec<Frame>,
    ) -> Vec<Frame> {
        default_prepare_output(source, input, results)
    }
}

/// Default output policy, usable by stages that override `prepare_output`
/// only conditionally.
pub fn default_prepare_output(
    source: &FrameSource,
    input: &Frame,
    results: Vec<Frame>,
) -> Vec<Frame> {
    if results.is_empty() {
        // Nothing produced (not interested, or allocation skipped): the
        // input continues downstream untouched.
        return vec![input.clone()];
    }
    if let Some(set) = input.as_frameset() {
        let mut children: Vec<Frame> = set
            .iter()
            .filter(|child| {
                !results
                    .iter()
                    .any(|r| r.profile().lineage == child.profile().lineage)
            })
            .cloned()
            .collect();
        children.extend(results);
        return source
            .allocate_composite_frame(children)
            .map(WritableFrame::finish)
            .into_iter()
            .collect();
    }
    if results.len() == 1 {
        return results;
    }
    source
        .allocate_composite_frame(results)
        .map(WritableFrame::finish)
        .into_iter()
        .collect()
}

struct BlockShared {
    stage: Mutex<Box<dyn ProcessingStage>>,
    options: OptionMap,
    info: RwLock<HashMap<&'static str, String>>,
    output: RwLock<Option<Arc<dyn FrameSink>>>,
    pool: FramePool,
}

impl Drop for BlockShared {
    fn drop(&mut self) {
        // Invocations are synchronous, so by the time the last handle drops
        // there is no in-flight work to drain; closing the pool releases the
        // recycled buffers.
        self.pool.close();
    }
}

/// A named pipeline stage. Clone is handle copy; all clones drive the same
/// stage state and downstream edge.
#[derive(Clone)]
pub struct ProcessingBlock {
    shared: Arc<BlockShared>,
}

impl ProcessingBlock {
    pub fn new(stage: impl ProcessingStage + 'static) -> Self {
        let options = OptionMap::new();
        for (key, option) in stage.options() {
            options.register(key, option);
        }
        let mut info = HashMap::new();
        info.insert(INFO_NAME, stage.name().to_owned());
        Self {
            shared: Arc::new(BlockShared {
                stage: Mutex::new(Box::new(stage)),
                options,
                info: RwLock::new(info),
                output: RwLock::new(None),
                pool: FramePool::new(),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.info(INFO_NAME).unwrap_or_default()
    }

    pub fn info(&self, key: &'static str) -> Option<String> {
        self.shared.info.read().get(key).cloned()
    }

    pub fn update_info(&self, key: &'static str, value: impl Into<String>) {
        self.shared.info.write().insert(key, value.into());
    }

    /// Wire the downstream edge. A block has exactly one; rewiring replaces
    /// it.
    pub fn start(&self, sink: impl FrameSink + 'static) {
        self.start_shared(Arc::new(sink));
    }

    pub fn start_shared(&self, sink: Arc<dyn FrameSink>) {
        *self.shared.output.write() = Some(sink);
    }

    /// Push a frame through the stage on the calling thread.
    pub fn invoke(&self, frame: Frame) {
        let mut stage = self.shared.stage.lock();
        if !stage.should_process(&frame) {
            drop(stage);
            self.emit(frame);
            return;
        }
        let source = FrameSource::with_pool(self.shared.pool.clone(), self.output_or_null());
        let outputs = match stage.process_frame(&source, &frame) {
            Ok(results) => stage.prepare_output(&source, &frame, results),
            Err(e) => {
                // Stage failures are local: keep the stream alive by
                // forwarding the input unchanged.
                warn!(block = %self.name(), error = %e, "stage failed; forwarding input unchanged");
                vec![frame.clone()]
            }
        };
        // The stage is released before delivery: downstream callbacks may
        // feed frames back into this block.
        drop(stage);
        for frame in outputs {
            self.emit(frame);
        }
    }

    fn emit(&self, frame: Frame) {
        let sink = match self.shared.output.read().clone() {
            Some(sink) => sink,
            None => {
                debug!(block = %self.name(), "no output wired; frame dropped");
                return;
            }
        };
        let fps = frame.profile().fps;
        let frame_number = frame.frame_number();
        let started = Instant::now();
        sink.send(frame);
        let budget_ms = 1000 / (fps as u64 + 1);
        let elapsed = started.elapsed().as_millis() as u64;
        if elapsed > budget_ms {
            warn!(
                block = %self.name(),
                frame_number,
                elapsed_ms = elapsed,
                budget_ms,
                "downstream callback took longer than one frame interval"
            );
        }
    }

    fn output_or_null(&self) -> Arc<dyn FrameSink> {
        self.shared
            .output
            .read()
            .clone()
            .unwrap_or_else(|| Arc::new(ClosureSink::new(|_| {})))
    }

    /// Keys of every option this block carries.
    pub fn option_keys(&self) -> Vec<OptionKey> {
        self.shared.options.keys()
    }
}

/// Chaining edge: invoking a block is sending to it.
impl FrameSink for ProcessingBlock {
    fn send(&self, frame: Frame) {
        self.invoke(frame);
    }
}

/// Uniform Option surface shared by plain, composite and dual blocks.
pub trait OptionsHolder {
    fn supports_option(&self, key: OptionKey) -> bool;
    fn get_option(&self, key: OptionKey) -> Result<f32>;
    fn set_option(&self, key: OptionKey, value: f32) -> Result<()>;
    fn option_range(&self, key: OptionKey) -> Result<OptionRange>;
    fn option_description(&self, key: OptionKey) -> Result<String>;
    fn is_option_read_only(&self, key: OptionKey) -> Result<bool>;
}

impl OptionsHolder for ProcessingBlock {
    fn supports_option(&self, key: OptionKey) -> bool {
        self.shared.options.supports(key)
    }

    fn get_option(&self, key: OptionKey) -> Result<f32> {
        Ok(self.shared.options.get(key)?.query())
    }

    fn set_option(&self, key: OptionKey, value: f32) -> Result<()> {
        self.shared.options.get(key)?.set(value)
    }

    fn option_range(&self, key: OptionKey) -> Result<OptionRange> {
        Ok(self.shared.options.get(key)?.range())
    }

    fn option_description(&self, key: OptionKey) -> Result<String> {
        Ok(self.shared.options.get(key)?.description().to_owned())
    }

    fn is_option_read_only(&self, key: OptionKey) -> Result<bool> {
        Ok(self.shared.options.get(key)?.is_read_only())
    }
}
