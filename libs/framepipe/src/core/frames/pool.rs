// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame pool and source.
//!
//! Buffers are bucketed by (stream lineage, byte size) and recycled when the
//! last handle of a published frame drops, so steady-state streaming does
//! not churn the allocator. The source is the producer-facing mint: it
//! allocates writable frames against the pool and publishes finished frames
//! into the owning block's sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    is_depth_format, FrameMetadata, FramePayload, MotionSample, PointsPayload, VideoPayload,
    WritableFrame,
};
use crate::core::frames::Frame;
use crate::core::processing::FrameSink;
use crate::core::streams::StreamProfile;

/// Buffers idle in a bucket longer than this are discarded on the next
/// allocation pass, so a stopped stream does not pin memory forever.
const STALE_BUFFER_HORIZON: Duration = Duration::from_secs(1);

const DEFAULT_MAX_BUFFERS_PER_BUCKET: usize = 16;

/// Default depth scale when neither template nor caller provides one: 1mm.
const DEFAULT_DEPTH_UNITS: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    lineage: u32,
    size: usize,
}

struct Recycled {
    data: Vec<u8>,
    returned_at: Instant,
}

pub(crate) struct PoolShared {
    buckets: Mutex<HashMap<PoolKey, Vec<Recycled>>>,
    closed: AtomicBool,
    max_per_bucket: usize,
}

impl PoolShared {
    fn release(&self, key: PoolKey, data: Vec<u8>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();
        if bucket.len() < self.max_per_bucket {
            bucket.push(Recycled {
                data,
                returned_at: Instant::now(),
            });
        }
    }
}

/// Byte buffer tied to its pool bucket; returns there on drop.
pub(crate) struct PooledBuffer {
    data: Vec<u8>,
    origin: Option<(Weak<PoolShared>, PoolKey)>,
}

impl PooledBuffer {
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some((pool, key)) = self.origin.take() {
            if let Some(pool) = pool.upgrade() {
                pool.release(key, std::mem::take(&mut self.data));
            }
        }
    }
}

/// Reference-counted pool of frame buffers, bucketed by stream lineage and
/// byte size.
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::with_bucket_capacity(DEFAULT_MAX_BUFFERS_PER_BUCKET)
    }

    pub fn with_bucket_capacity(max_per_bucket: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                buckets: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                max_per_bucket,
            }),
        }
    }

    fn acquire(&self, key: PoolKey) -> Option<PooledBuffer> {
        if self.shared.closed.load(Ordering::Acquire) {
            return None;
        }
        let recycled = {
            let mut buckets = self.shared.buckets.lock();
            // Drop buffers that sat unused past the staleness horizon.
            let now = Instant::now();
            for bucket in buckets.values_mut() {
                bucket.retain(|r| now.duration_since(r.returned_at) < STALE_BUFFER_HORIZON);
            }
            buckets.get_mut(&key).and_then(|b| b.pop())
        };
        let data = match recycled {
            Some(r) => r.data,
            None => vec![0u8; key.size],
        };
        Some(PooledBuffer {
            data,
            origin: Some((Arc::downgrade(&self.shared), key)),
        })
    }

    /// Mint a writable video frame of `size` bytes against `profile`'s
    /// bucket, with shape defaults taken from the profile. `None` once the
    /// pool is closed.
    pub fn allocate_raw(&self, profile: &StreamProfile, size: usize) -> Option<WritableFrame> {
        let buffer = self.acquire(PoolKey {
            lineage: profile.lineage,
            size,
        })?;
        let bits_per_pixel = profile.format.bits_per_pixel();
        let stride = (profile.width as usize * bits_per_pixel) / 8;
        let depth_units = is_depth_format(profile.format).then_some(DEFAULT_DEPTH_UNITS);
        Some(WritableFrame::new(
            FrameMetadata::new(*profile),
            FramePayload::Video(VideoPayload {
                buffer,
                stride,
                bits_per_pixel,
                depth_units,
            }),
        ))
    }

    /// Stop allocation; recycled buffers are freed instead of retained.
    /// Outstanding frames stay valid until their last handle drops.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.buckets.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Buffers currently resting in buckets (test/diagnostic hook).
    pub fn idle_buffers(&self) -> usize {
        self.shared.buckets.lock().values().map(Vec::len).sum()
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape overrides for video allocation; unset fields inherit from the
/// target profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoOverrides {
    pub bits_per_pixel: Option<usize>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bytes per row.
    pub stride: Option<usize>,
}

/// Frame mint bound to a downstream sink.
///
/// Stages receive a source per invocation to allocate output frames;
/// producers own one long-lived source and publish through `frame_ready`.
#[derive(Clone)]
pub struct FrameSource {
    pool: FramePool,
    sink: Arc<dyn FrameSink>,
}

impl FrameSource {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            pool: FramePool::new(),
            sink,
        }
    }

    pub(crate) fn with_pool(pool: FramePool, sink: Arc<dyn FrameSink>) -> Self {
        Self { pool, sink }
    }

    /// Allocate a writable video frame for `profile`, recycling a pooled
    /// buffer when one fits. Metadata not overridden here is inherited from
    /// `template` so provenance survives transformation. Returns `None`
    /// (never blocks) once the source has shut down.
    pub fn allocate_video_frame(
        &self,
        profile: StreamProfile,
        template: Option<&Frame>,
        overrides: VideoOverrides,
    ) -> Option<WritableFrame> {
        let bits_per_pixel = overrides
            .bits_per_pixel
            .unwrap_or_else(|| profile.format.bits_per_pixel());
        let width = overrides.width.unwrap_or(profile.width);
        let height = overrides.height.unwrap_or(profile.height);
        let stride = overrides
            .stride
            .unwrap_or((width as usize * bits_per_pixel) / 8);
        let size = stride * height as usize;

        let buffer = self.pool.acquire(PoolKey {
            lineage: profile.lineage,
            size,
        })?;

        let mut metadata = match template {
            Some(t) => t.metadata().clone(),
            None => FrameMetadata::new(profile),
        };
        metadata.profile = profile;

        let inherited_units = template.and_then(|t| t.as_depth().map(|d| d.depth_units()));
        let depth_units = if is_depth_format(profile.format) {
            Some(inherited_units.unwrap_or(DEFAULT_DEPTH_UNITS))
        } else {
            None
        };

        Some(WritableFrame::new(
            metadata,
            FramePayload::Video(VideoPayload {
                buffer,
                stride,
                bits_per_pixel,
                depth_units,
            }),
        ))
    }

    /// Allocate a composite frame owning `children` in order. Metadata is
    /// inherited from the first child. `None` on an empty child list or a
    /// shut-down source.
    pub fn allocate_composite_frame(&self, children: Vec<Frame>) -> Option<WritableFrame> {
        if self.pool.is_closed() {
            return None;
        }
        let first = match children.first() {
            Some(f) => f,
            None => {
                warn!("composite frame allocation with no children refused");
                return None;
            }
        };
        let metadata = first.metadata().clone();
        Some(WritableFrame::new(
            metadata,
            FramePayload::Composite(children),
        ))
    }

    pub fn allocate_motion_frame(
        &self,
        profile: StreamProfile,
        template: Option<&Frame>,
        sample: MotionSample,
    ) -> Option<WritableFrame> {
        if self.pool.is_closed() {
            return None;
        }
        let mut metadata = match template {
            Some(t) => t.metadata().clone(),
            None => FrameMetadata::new(profile),
        };
        metadata.profile = profile;
        Some(WritableFrame::new(metadata, FramePayload::Motion(sample)))
    }

    /// Allocate a zeroed points frame with `vertex_count` vertices and UVs.
    pub fn allocate_points_frame(
        &self,
        profile: StreamProfile,
        template: Option<&Frame>,
        vertex_count: usize,
    ) -> Option<WritableFrame> {
        if self.pool.is_closed() {
            return None;
        }
        let mut metadata = match template {
            Some(t) => t.metadata().clone(),
            None => FrameMetadata::new(profile),
        };
        metadata.profile = profile;
        Some(WritableFrame::new(
            metadata,
            FramePayload::Points(PointsPayload {
                vertices: vec![[0.0; 3]; vertex_count],
                texcoords: vec![[0.0; 2]; vertex_count],
            }),
        ))
    }

    /// Publish a finished frame downstream. Consumes the writable handle:
    /// after this call nobody can write to the frame again, and publishing
    /// twice does not compile.
    pub fn frame_ready(&self, frame: WritableFrame) {
        let sealed = frame.finish();
        debug!(
            kind = ?sealed.kind(),
            frame_number = sealed.frame_number(),
            "frame published"
        );
        self.sink.send(sealed);
    }

    /// End the source's lifetime: subsequent allocations return `None`.
    pub fn shutdown(&self) {
        self.pool.close();
    }

    /// The pool this source allocates from.
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }
}
