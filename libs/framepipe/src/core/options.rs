// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Runtime options: typed, range-validated key -> float settings exposed
//! uniformly by every processing block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::error::{PipelineError, Result};

/// Option keys are static names; blocks register the ones they carry.
pub type OptionKey = &'static str;

/// Backend-selector flag consumed by dual blocks: non-zero means this member
/// wants to handle calls.
pub const OPT_ENABLED: OptionKey = "enabled";

/// Downsample magnitude of the decimation stage.
pub const OPT_FILTER_MAGNITUDE: OptionKey = "filter-magnitude";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

impl OptionRange {
    pub fn new(min: f32, max: f32, step: f32, default: f32) -> Self {
        Self {
            min,
            max,
            step,
            default,
        }
    }

    /// 0/1 toggle defaulting to `default`.
    pub fn boolean(default: bool) -> Self {
        Self::new(0.0, 1.0, 1.0, if default { 1.0 } else { 0.0 })
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One typed runtime setting. Implementations must be cheap and callable
/// from any thread; a failed `set` leaves prior state untouched.
pub trait BlockOption: Send + Sync {
    fn query(&self) -> f32;
    fn set(&self, value: f32) -> Result<()>;
    fn range(&self) -> OptionRange;
    fn is_read_only(&self) -> bool {
        false
    }
    fn description(&self) -> &str;
}

/// Plain float option backed by an atomic, validated against its range.
pub struct FloatOption {
    key: OptionKey,
    bits: AtomicU32,
    range: OptionRange,
    description: String,
    read_only: bool,
}

impl FloatOption {
    pub fn new(key: OptionKey, range: OptionRange, description: impl Into<String>) -> Self {
        Self {
            key,
            bits: AtomicU32::new(range.default.to_bits()),
            range,
            description: description.into(),
            read_only: false,
        }
    }

    pub fn read_only(
        key: OptionKey,
        range: OptionRange,
        description: impl Into<String>,
    ) -> Self {
        let mut opt = Self::new(key, range, description);
        opt.read_only = true;
        opt
    }

    /// Bypass validation; for the owning stage downgrading itself (backend
    /// failure), not for callers.
    pub fn force_set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

impl BlockOption for FloatOption {
    fn query(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn set(&self, value: f32) -> Result<()> {
        if self.read_only {
            return Err(PipelineError::OptionReadOnly { key: self.key });
        }
        if !self.range.contains(value) {
            return Err(PipelineError::OptionOutOfRange {
                key: self.key,
                value,
                min: self.range.min,
                max: self.range.max,
            });
        }
        self.bits.store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    fn range(&self) -> OptionRange {
        self.range
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Registry of a block's options.
#[derive(Clone, Default)]
pub struct OptionMap {
    entries: Arc<RwLock<HashMap<OptionKey, Arc<dyn BlockOption>>>>,
}

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: OptionKey, option: Arc<dyn BlockOption>) {
        self.entries.write().insert(key, option);
    }

    pub fn supports(&self, key: OptionKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn get(&self, key: OptionKey) -> Result<Arc<dyn BlockOption>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or(PipelineError::UnsupportedOption { key })
    }

    pub fn keys(&self) -> Vec<OptionKey> {
        self.entries.read().keys().copied().collect()
    }
}
