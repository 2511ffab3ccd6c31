// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Execution lanes: shared accelerator lifecycle for GPU-backed stages.
//!
//! A lane owns the active/inactive state of one accelerator context and
//! walks every registered [`GpuObject`] through matching create/cleanup
//! cycles, so a context loss (device removed, app backgrounded) tears all
//! device resources down together and a later `init` rebuilds them from
//! their CPU backups.

pub mod section;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

pub use section::GpuSection;

use crate::core::context::GpuContext;
use crate::core::error::Result;

/// What a lane is for; purely diagnostic, both roles behave identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneRole {
    Rendering,
    Processing,
}

/// The accelerator a lane is currently bound to.
///
/// A software context has no device: objects keep their CPU state and
/// accelerated work falls back, which is also what makes lane lifecycle
/// testable on machines without a GPU.
#[derive(Clone)]
pub struct LaneContext {
    gpu: Option<Arc<GpuContext>>,
}

impl LaneContext {
    pub fn accelerated(gpu: Arc<GpuContext>) -> Self {
        Self { gpu: Some(gpu) }
    }

    pub fn software() -> Self {
        Self { gpu: None }
    }

    pub fn gpu(&self) -> Option<&Arc<GpuContext>> {
        self.gpu.as_ref()
    }

    pub fn is_accelerated(&self) -> bool {
        self.gpu.is_some()
    }
}

/// Object holding per-context device resources, managed by a lane.
///
/// `create` and `cleanup` are called in strict alternation; an object never
/// sees two creates or two cleanups in a row.
pub trait GpuObject: Send {
    fn create_gpu_resources(&mut self, context: &LaneContext) -> Result<()>;
    fn cleanup_gpu_resources(&mut self);
}

struct LaneEntry {
    object: Arc<Mutex<dyn GpuObject>>,
    /// True between a successful create and the matching cleanup.
    needs_cleanup: bool,
}

struct LaneShared {
    role: LaneRole,
    entries: Mutex<HashMap<u64, LaneEntry>>,
    context: Mutex<Option<LaneContext>>,
    /// Serializes accelerated work against init/shutdown. Reentrant so an
    /// action may nest further actions on the same thread.
    session: ReentrantMutex<()>,
    next_id: AtomicU64,
}

/// Shared lifecycle domain for accelerated objects. Clone is handle copy.
#[derive(Clone)]
pub struct ExecutionLane {
    shared: Arc<LaneShared>,
}

/// Registration handle; dropping it unregisters the object, cleaning up its
/// device resources if the lane is active.
pub struct GpuObjectHandle {
    shared: Arc<LaneShared>,
    id: u64,
}

impl ExecutionLane {
    pub fn new(role: LaneRole) -> Self {
        Self {
            shared: Arc::new(LaneShared {
                role,
                entries: Mutex::new(HashMap::new()),
                context: Mutex::new(None),
                session: ReentrantMutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn role(&self) -> LaneRole {
        self.shared.role
    }

    pub fn is_active(&self) -> bool {
        self.shared.context.lock().is_some()
    }

    /// Register an object. On an active lane its resources are created
    /// immediately; otherwise creation waits for the next `init`.
    pub fn register(&self, object: Arc<Mutex<dyn GpuObject>>) -> GpuObjectHandle {
        let _session = self.shared.session.lock();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut needs_cleanup = false;
        if let Some(context) = self.shared.context.lock().clone() {
            needs_cleanup = create_one(&object, &context, self.shared.role, id);
        }
        self.shared.entries.lock().insert(
            id,
            LaneEntry {
                object,
                needs_cleanup,
            },
        );
        GpuObjectHandle {
            shared: self.shared.clone(),
            id,
        }
    }

    /// Activate the lane on `context`, creating resources for every
    /// registered object that does not have them.
    pub fn init(&self, context: LaneContext) {
        let _session = self.shared.session.lock();
        debug!(role = ?self.shared.role, accelerated = context.is_accelerated(), "lane init");
        *self.shared.context.lock() = Some(context.clone());
        let mut entries = self.shared.entries.lock();
        for (id, entry) in entries.iter_mut() {
            if !entry.needs_cleanup {
                entry.needs_cleanup = create_one(&entry.object, &context, self.shared.role, *id);
            }
        }
    }

    /// Deactivate the lane, releasing every object's device resources.
    /// Idempotent; shutting down an inactive lane is a no-op.
    pub fn shutdown(&self) {
        let _session = self.shared.session.lock();
        if self.shared.context.lock().take().is_none() {
            return;
        }
        debug!(role = ?self.shared.role, "lane shutdown");
        let mut entries = self.shared.entries.lock();
        for entry in entries.values_mut() {
            if entry.needs_cleanup {
                entry.object.lock().cleanup_gpu_resources();
                entry.needs_cleanup = false;
            }
        }
    }

    /// Run `action` against the live context, or `fallback` when the lane is
    /// inactive or the action fails. The lane stays active across the call;
    /// a failing action is reported by the fallback result, not by tearing
    /// the lane down.
    pub fn perform_gpu_action<T>(
        &self,
        action: impl FnOnce(&LaneContext) -> Result<T>,
        fallback: impl FnOnce() -> T,
    ) -> T {
        let _session = self.shared.session.lock();
        let context = self.shared.context.lock().clone();
        match context {
            Some(context) => match action(&context) {
                Ok(value) => value,
                Err(e) => {
                    warn!(role = ?self.shared.role, error = %e, "accelerated action failed, using fallback");
                    fallback()
                }
            },
            None => fallback(),
        }
    }
}

fn create_one(
    object: &Arc<Mutex<dyn GpuObject>>,
    context: &LaneContext,
    role: LaneRole,
    id: u64,
) -> bool {
    match object.lock().create_gpu_resources(context) {
        Ok(()) => true,
        Err(e) => {
            warn!(role = ?role, object = id, error = %e, "gpu resource creation failed");
            false
        }
    }
}

impl Drop for GpuObjectHandle {
    fn drop(&mut self) {
        let _session = self.shared.session.lock();
        if let Some(entry) = self.shared.entries.lock().remove(&self.id) {
            if entry.needs_cleanup {
                entry.object.lock().cleanup_gpu_resources();
            }
        }
    }
}
