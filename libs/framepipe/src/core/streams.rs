// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stream identity: kinds, pixel formats, profiles and the append-only
//! extrinsics graph relating profiles spatially.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use petgraph::algo::astar;
use petgraph::graphmap::DiGraphMap;

/// Logical stream classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Depth,
    Color,
    Infrared,
    Fisheye,
    Motion,
    Points,
}

/// Pixel/sample layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 16-bit linear depth, scaled by the device depth unit.
    Z16,
    /// 16-bit disparity.
    Disparity16,
    /// 8-bit grayscale.
    Y8,
    /// 16-bit grayscale.
    Y16,
    Rgb8,
    Rgba8,
    Bgr8,
    /// Packed YUY2 luma/chroma.
    Yuyv,
    /// 3x f32 motion sample (gyro/accel).
    MotionXyz32F,
    /// 3x f32 vertex stream.
    Xyz32F,
}

impl PixelFormat {
    /// Bits used per pixel (per sample element for non-video formats).
    pub fn bits_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Z16 | PixelFormat::Disparity16 | PixelFormat::Y16 => 16,
            PixelFormat::Y8 => 8,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 24,
            PixelFormat::Rgba8 => 32,
            PixelFormat::Yuyv => 16,
            PixelFormat::MotionXyz32F | PixelFormat::Xyz32F => 96,
        }
    }
}

static NEXT_PROFILE_UID: AtomicU32 = AtomicU32::new(1);

/// Identity of one logical stream: what kind of data it carries, how it is
/// shaped, and at what rate it paces.
///
/// Profiles are cheap to copy. `uid` is unique per profile instance;
/// `lineage` survives [`StreamProfile::clone_with`] so a stage that reshapes
/// a stream (decimation, format conversion) stays traceable to the physical
/// sensor stream it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProfile {
    pub kind: StreamKind,
    /// Index for multiplexed streams of the same kind (e.g. two infrared
    /// imagers).
    pub index: u8,
    pub format: PixelFormat,
    /// Zero for non-video streams.
    pub width: u32,
    pub height: u32,
    /// Nominal frames per second.
    pub fps: u32,
    pub uid: u32,
    pub lineage: u32,
}

impl StreamProfile {
    pub fn video(
        kind: StreamKind,
        index: u8,
        format: PixelFormat,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Self {
        let uid = NEXT_PROFILE_UID.fetch_add(1, Ordering::Relaxed);
        Self {
            kind,
            index,
            format,
            width,
            height,
            fps,
            uid,
            lineage: uid,
        }
    }

    pub fn motion(kind: StreamKind, index: u8, fps: u32) -> Self {
        let uid = NEXT_PROFILE_UID.fetch_add(1, Ordering::Relaxed);
        Self {
            kind,
            index,
            format: PixelFormat::MotionXyz32F,
            width: 0,
            height: 0,
            fps,
            uid,
            lineage: uid,
        }
    }

    /// Derive a differently-shaped profile with a fresh uid but the same
    /// lineage, for stages producing reshaped output from the same sensor.
    pub fn clone_with(&self, mutate: impl FnOnce(&mut StreamProfile)) -> Self {
        let mut out = *self;
        out.uid = NEXT_PROFILE_UID.fetch_add(1, Ordering::Relaxed);
        mutate(&mut out);
        out
    }

    /// Byte size of one frame of this profile, zero when not a video stream.
    pub fn frame_size(&self) -> usize {
        (self.width as usize * self.height as usize * self.format.bits_per_pixel()) / 8
    }
}

/// Rigid spatial transform between two stream viewpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    /// Column-major 3x3 rotation.
    pub rotation: [f32; 9],
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0, 0.0, 0.0],
        }
    }

    pub fn new(rotation: [f32; 9], translation: [f32; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// `self` applied after `first`: maps a point through `first`, then
    /// through `self`.
    pub fn compose(&self, first: &Extrinsics) -> Extrinsics {
        let mut rotation = [0.0f32; 9];
        for col in 0..3 {
            for row in 0..3 {
                let mut acc = 0.0;
                for k in 0..3 {
                    acc += self.rotation[k * 3 + row] * first.rotation[col * 3 + k];
                }
                rotation[col * 3 + row] = acc;
            }
        }
        let mut translation = [0.0f32; 3];
        for row in 0..3 {
            translation[row] = self.rotation[row] * first.translation[0]
                + self.rotation[3 + row] * first.translation[1]
                + self.rotation[6 + row] * first.translation[2]
                + self.translation[row];
        }
        Extrinsics {
            rotation,
            translation,
        }
    }

    /// Inverse transform (rotation transposed, translation reversed).
    pub fn inverse(&self) -> Extrinsics {
        let r = &self.rotation;
        let rotation = [
            r[0], r[3], r[6], //
            r[1], r[4], r[7], //
            r[2], r[5], r[8],
        ];
        let t = &self.translation;
        let translation = [
            -(rotation[0] * t[0] + rotation[3] * t[1] + rotation[6] * t[2]),
            -(rotation[1] * t[0] + rotation[4] * t[1] + rotation[7] * t[2]),
            -(rotation[2] * t[0] + rotation[5] * t[1] + rotation[8] * t[2]),
        ];
        Extrinsics {
            rotation,
            translation,
        }
    }

    pub fn apply(&self, point: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        [
            r[0] * point[0] + r[3] * point[1] + r[6] * point[2] + self.translation[0],
            r[1] * point[0] + r[4] * point[1] + r[7] * point[2] + self.translation[1],
            r[2] * point[0] + r[5] * point[1] + r[8] * point[2] + self.translation[2],
        ]
    }
}

/// Append-only registry of spatial transforms between stream profiles,
/// queried by shortest path with transform composition.
///
/// Registering `a -> b` also records the inverse edge, so queries work in
/// either direction and across chains (`depth -> color -> fisheye`).
pub struct ExtrinsicsGraph {
    graph: RwLock<DiGraphMap<u32, Extrinsics>>,
}

impl ExtrinsicsGraph {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraphMap::new()),
        }
    }

    /// Record the transform from `from` to `to`. Append-only: re-registering
    /// the same pair replaces the edge, nothing is ever removed.
    pub fn register(&self, from: &StreamProfile, to: &StreamProfile, extrinsics: Extrinsics) {
        let mut graph = self.graph.write();
        graph.add_edge(from.uid, to.uid, extrinsics);
        graph.add_edge(to.uid, from.uid, extrinsics.inverse());
    }

    /// Transform from `from`'s viewpoint to `to`'s, composed along the
    /// shortest registered path. `None` when the profiles are unrelated.
    pub fn query(&self, from: &StreamProfile, to: &StreamProfile) -> Option<Extrinsics> {
        if from.uid == to.uid {
            return Some(Extrinsics::identity());
        }
        let graph = self.graph.read();
        let (_, path) = astar(&*graph, from.uid, |n| n == to.uid, |_| 1u32, |_| 0u32)?;
        let mut acc = Extrinsics::identity();
        for pair in path.windows(2) {
            let edge = graph.edge_weight(pair[0], pair[1])?;
            acc = edge.compose(&acc);
        }
        Some(acc)
    }
}

impl Default for ExtrinsicsGraph {
    fn default() -> Self {
        Self::new()
    }
}
