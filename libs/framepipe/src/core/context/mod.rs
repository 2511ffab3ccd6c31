// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod gpu_context;

pub use gpu_context::GpuContext;
