// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frames: the reference-counted, immutable-once-published unit moved
//! through the pipeline.
//!
//! Allocation hands out a [`WritableFrame`] (unique, mutable). Publishing it
//! (`FrameSource::frame_ready`) or sealing it ([`WritableFrame::finish`])
//! consumes the writable handle and yields the shared [`Frame`], so double
//! publish and write-after-publish are unrepresentable rather than detected
//! at runtime. Frame kinds are a closed payload enum queried through typed
//! capability views, not a subclass hierarchy.

pub mod metadata;
pub mod pool;

use std::sync::Arc;

pub use metadata::{FrameMetadata, TimestampDomain};
pub use pool::{FramePool, FrameSource, VideoOverrides};

use crate::core::error::{PipelineError, Result};
use crate::core::streams::{PixelFormat, StreamKind, StreamProfile};
use pool::PooledBuffer;

/// One gyro/accelerometer reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

pub struct VideoPayload {
    pub(crate) buffer: PooledBuffer,
    /// Bytes per row.
    pub(crate) stride: usize,
    pub(crate) bits_per_pixel: usize,
    /// Meters per depth unit, present on depth-capable frames.
    pub(crate) depth_units: Option<f32>,
}

pub struct PointsPayload {
    pub(crate) vertices: Vec<[f32; 3]>,
    pub(crate) texcoords: Vec<[f32; 2]>,
}

/// Closed set of frame capability variants.
pub enum FramePayload {
    Video(VideoPayload),
    Points(PointsPayload),
    Motion(MotionSample),
    Composite(Vec<Frame>),
}

struct FrameInner {
    metadata: FrameMetadata,
    payload: FramePayload,
}

/// Shared, immutable handle to a published frame.
///
/// Clone is handle copy; the pooled backing buffer returns to its pool when
/// the last clone drops.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    pub fn metadata(&self) -> &FrameMetadata {
        &self.inner.metadata
    }

    pub fn profile(&self) -> &StreamProfile {
        &self.inner.metadata.profile
    }

    pub fn kind(&self) -> StreamKind {
        self.inner.metadata.profile.kind
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.inner.metadata.timestamp_ns
    }

    pub fn frame_number(&self) -> u64 {
        self.inner.metadata.frame_number
    }

    /// Raw pixel bytes for video-capable frames.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.inner.payload {
            FramePayload::Video(v) => Some(v.buffer.data()),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<VideoView<'_>> {
        match &self.inner.payload {
            FramePayload::Video(v) => Some(VideoView {
                payload: v,
                metadata: &self.inner.metadata,
            }),
            _ => None,
        }
    }

    /// Depth view: a video frame carrying a depth-unit scale.
    pub fn as_depth(&self) -> Option<DepthView<'_>> {
        match &self.inner.payload {
            FramePayload::Video(v) => v.depth_units.map(|units| DepthView {
                video: VideoView {
                    payload: v,
                    metadata: &self.inner.metadata,
                },
                units,
            }),
            _ => None,
        }
    }

    pub fn as_points(&self) -> Option<PointsView<'_>> {
        match &self.inner.payload {
            FramePayload::Points(p) => Some(PointsView { payload: p }),
            _ => None,
        }
    }

    pub fn as_motion(&self) -> Option<MotionSample> {
        match &self.inner.payload {
            FramePayload::Motion(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_frameset(&self) -> Option<Frameset<'_>> {
        match &self.inner.payload {
            FramePayload::Composite(children) => Some(Frameset { children }),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.inner.payload, FramePayload::Composite(_))
    }

    /// Number of live handles, for pool accounting and tests.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind())
            .field("frame_number", &self.frame_number())
            .field("timestamp_ns", &self.timestamp_ns())
            .field("composite", &self.is_composite())
            .finish()
    }
}

/// Typed view over a video-capable frame.
pub struct VideoView<'a> {
    payload: &'a VideoPayload,
    metadata: &'a FrameMetadata,
}

impl<'a> VideoView<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.payload.buffer.data()
    }

    pub fn width(&self) -> u32 {
        self.metadata.profile.width
    }

    pub fn height(&self) -> u32 {
        self.metadata.profile.height
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.payload.stride
    }

    pub fn bits_per_pixel(&self) -> usize {
        self.payload.bits_per_pixel
    }
}

/// Video view plus the distance-at-pixel query.
pub struct DepthView<'a> {
    video: VideoView<'a>,
    units: f32,
}

impl<'a> DepthView<'a> {
    pub fn video(&self) -> &VideoView<'a> {
        &self.video
    }

    /// Meters per raw depth unit.
    pub fn depth_units(&self) -> f32 {
        self.units
    }

    /// Distance in meters at pixel (x, y). Zero raw depth reads as zero
    /// distance (invalid pixel).
    pub fn distance(&self, x: u32, y: u32) -> Result<f32> {
        let w = self.video.width();
        let h = self.video.height();
        if x >= w || y >= h {
            return Err(PipelineError::InvalidUsage(format!(
                "pixel ({x}, {y}) outside {w}x{h} depth frame"
            )));
        }
        let offset = y as usize * self.video.stride() + x as usize * 2;
        let data = self.video.data();
        let raw = u16::from_le_bytes([data[offset], data[offset + 1]]);
        Ok(raw as f32 * self.units)
    }
}

pub struct PointsView<'a> {
    payload: &'a PointsPayload,
}

impl<'a> PointsView<'a> {
    pub fn vertices(&self) -> &'a [[f32; 3]] {
        &self.payload.vertices
    }

    pub fn texcoords(&self) -> &'a [[f32; 2]] {
        &self.payload.texcoords
    }
}

/// Ordered, fixed-at-construction collection of temporally coherent child
/// frames.
pub struct Frameset<'a> {
    children: &'a [Frame],
}

impl<'a> Frameset<'a> {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child at `index`; out-of-range indexing is an invalid-usage error,
    /// never a silent empty result.
    pub fn get(&self, index: usize) -> Result<&'a Frame> {
        self.children.get(index).ok_or_else(|| {
            PipelineError::InvalidUsage(format!(
                "frameset index {index} out of range ({} children)",
                self.children.len()
            ))
        })
    }

    /// First child of the given stream kind.
    pub fn first_of(&self, kind: StreamKind) -> Option<&'a Frame> {
        self.children.iter().find(|f| f.kind() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Frame> {
        self.children.iter()
    }
}

/// Uniquely owned frame under construction. Only the allocating stage holds
/// it, and only until publication.
pub struct WritableFrame {
    inner: FrameInner,
}

impl WritableFrame {
    pub(crate) fn new(metadata: FrameMetadata, payload: FramePayload) -> Self {
        Self {
            inner: FrameInner { metadata, payload },
        }
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.inner.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut FrameMetadata {
        &mut self.inner.metadata
    }

    /// Mutable pixel bytes, for video-capable frames.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.inner.payload {
            FramePayload::Video(v) => Some(v.buffer.data_mut()),
            _ => None,
        }
    }

    pub fn set_depth_units(&mut self, units: f32) {
        if let FramePayload::Video(v) = &mut self.inner.payload {
            v.depth_units = Some(units);
        }
    }

    pub fn points_mut(&mut self) -> Option<(&mut [[f32; 3]], &mut [[f32; 2]])> {
        match &mut self.inner.payload {
            FramePayload::Points(p) => Some((&mut p.vertices, &mut p.texcoords)),
            _ => None,
        }
    }

    /// Seal the frame: no further writes, handle becomes shareable. Used by
    /// stages returning results to the block driver; producers publish with
    /// `FrameSource::frame_ready` instead, which seals internally.
    pub fn finish(self) -> Frame {
        Frame {
            inner: Arc::new(self.inner),
        }
    }
}

/// Pixel formats that mark a video frame as depth-capable.
pub(crate) fn is_depth_format(format: PixelFormat) -> bool {
    matches!(format, PixelFormat::Z16 | PixelFormat::Disparity16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::streams::{PixelFormat, StreamKind, StreamProfile};

    fn depth_writable() -> WritableFrame {
        let profile = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 4, 2, 30);
        let pool = FramePool::new();
        pool.allocate_raw(&profile, profile.frame_size())
            .expect("fresh pool allocates")
    }

    #[test]
    fn capability_views_match_payload() {
        let mut w = depth_writable();
        w.set_depth_units(0.001);
        let frame = w.finish();

        assert!(frame.as_video().is_some());
        assert!(frame.as_depth().is_some());
        assert!(frame.as_points().is_none());
        assert!(frame.as_motion().is_none());
        assert!(frame.as_frameset().is_none());
    }

    #[test]
    fn depth_distance_reads_scaled_pixel() {
        let mut w = depth_writable();
        w.set_depth_units(0.001);
        {
            let data = w.data_mut().unwrap();
            // Pixel (1, 0) = 1200 raw units -> 1.2m at 1mm units.
            data[2..4].copy_from_slice(&1200u16.to_le_bytes());
        }
        let frame = w.finish();
        let depth = frame.as_depth().unwrap();
        assert!((depth.distance(1, 0).unwrap() - 1.2).abs() < 1e-6);
        assert_eq!(depth.distance(0, 0).unwrap(), 0.0);
        assert!(depth.distance(4, 0).is_err());
    }

    #[test]
    fn frameset_indexing_is_loud_out_of_range() {
        let a = depth_writable().finish();
        let meta = a.metadata().clone();
        let set = WritableFrame::new(meta, FramePayload::Composite(vec![a])).finish();
        let fs = set.as_frameset().unwrap();
        assert_eq!(fs.len(), 1);
        assert!(fs.get(0).is_ok());
        assert!(matches!(
            fs.get(1),
            Err(PipelineError::InvalidUsage(_))
        ));
        assert!(fs.first_of(StreamKind::Depth).is_some());
        assert!(fs.first_of(StreamKind::Color).is_none());
    }
}
