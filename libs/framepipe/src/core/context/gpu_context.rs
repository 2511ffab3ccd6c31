//! Shared WebGPU device and queue.
//!
//! One context is created per process (or per lane group) and handed to
//! every accelerated stage, so textures can move between stages without
//! crossing device boundaries.

use std::sync::Arc;

use crate::core::{PipelineError, Result};

/// Shared GPU context for accelerated stages.
#[derive(Clone)]
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Initialize for the current platform, selecting the native backend
    /// (Metal, Vulkan, D3D12).
    pub async fn init_for_platform() -> Result<Self> {
        let backends = if cfg!(target_os = "macos") || cfg!(target_os = "ios") {
            wgpu::Backends::METAL
        } else if cfg!(target_os = "linux") {
            wgpu::Backends::VULKAN
        } else if cfg!(target_os = "windows") {
            wgpu::Backends::DX12
        } else {
            return Err(PipelineError::Gpu(
                "unsupported platform for GPU initialization".into(),
            ));
        };

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| PipelineError::Gpu(format!("failed to find GPU adapter: {e}")))?;

        tracing::info!(
            adapter = %adapter.get_info().name,
            backend = ?adapter.get_info().backend,
            "GPU adapter selected"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("framepipe GPU context"),
                required_features: wgpu::Features::empty(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| PipelineError::Gpu(format!("failed to create device: {e}")))?;

        tracing::info!("GPU device and queue created");

        Ok(Self::new(device, queue))
    }

    /// Blocking variant of [`GpuContext::init_for_platform`] for callers
    /// without an async runtime.
    pub fn init_for_platform_blocking() -> Result<Self> {
        pollster::block_on(Self::init_for_platform())
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("device", &format!("{:p}", self.device.as_ref()))
            .field("queue", &format!("{:p}", self.queue.as_ref()))
            .finish()
    }
}
