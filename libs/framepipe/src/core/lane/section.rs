// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU section: a 2D texture with a CPU backup that survives context loss.

use std::sync::Arc;

use tracing::debug;

use crate::core::context::GpuContext;
use crate::core::error::{PipelineError, Result};
use crate::core::lane::{GpuObject, LaneContext};

/// One texture-sized slice of device memory, mirrored on the CPU.
///
/// The texture exists only while the owning lane is active on an
/// accelerated context; the backup copy is authoritative across
/// cleanup/create cycles, so `fetch_to_cpu` keeps answering after a
/// shutdown and the texture is re-filled on the next init.
pub struct GpuSection {
    label: String,
    format: wgpu::TextureFormat,
    bytes_per_pixel: u32,
    width: u32,
    height: u32,
    backup: Option<Vec<u8>>,
    texture: Option<wgpu::Texture>,
    gpu: Option<Arc<GpuContext>>,
}

impl GpuSection {
    pub fn new(label: impl Into<String>, format: wgpu::TextureFormat, bytes_per_pixel: u32) -> Self {
        Self {
            label: label.into(),
            format,
            bytes_per_pixel,
            width: 0,
            height: 0,
            backup: None,
            texture: None,
            gpu: None,
        }
    }

    /// Resize the section. Drops the texture and any backup of the old
    /// shape; the next upload refills both.
    pub fn set_size(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.backup = None;
        self.texture = None;
        if self.gpu.is_some() && width > 0 && height > 0 {
            self.create_texture();
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn on_gpu(&self) -> bool {
        self.texture.is_some()
    }

    /// Store `data` as the section contents: always into the CPU backup,
    /// and through to the texture when one is live.
    pub fn upload(&mut self, data: &[u8]) -> Result<()> {
        let expected = (self.width * self.height * self.bytes_per_pixel) as usize;
        if data.len() != expected {
            return Err(PipelineError::InvalidUsage(format!(
                "section '{}' upload of {} bytes, expected {expected}",
                self.label,
                data.len()
            )));
        }
        self.backup = Some(data.to_vec());
        self.write_texture();
        Ok(())
    }

    /// Read the section contents from the CPU side. Valid whether or not
    /// the texture currently exists.
    pub fn fetch_to_cpu(&self) -> Option<&[u8]> {
        self.backup.as_deref()
    }

    fn create_texture(&mut self) {
        let gpu = match &self.gpu {
            Some(gpu) => gpu.clone(),
            None => return,
        };
        if self.width == 0 || self.height == 0 {
            return;
        }
        let texture = gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(&self.label),
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.texture = Some(texture);
        self.write_texture();
    }

    fn write_texture(&mut self) {
        let (Some(gpu), Some(texture), Some(backup)) = (&self.gpu, &self.texture, &self.backup)
        else {
            return;
        };
        gpu.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            backup,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * self.bytes_per_pixel),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl GpuObject for GpuSection {
    fn create_gpu_resources(&mut self, context: &LaneContext) -> Result<()> {
        self.gpu = context.gpu().cloned();
        if self.gpu.is_some() {
            // Restore device state from the backup taken before the last
            // cleanup.
            self.create_texture();
        } else {
            debug!(section = %self.label, "software context, keeping CPU copy only");
        }
        Ok(())
    }

    fn cleanup_gpu_resources(&mut self) {
        self.texture = None;
        self.gpu = None;
    }
}
