// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! GPU Backend Support
//!
//! Parses device specifications, resolves them to Candle devices with the
//! configured CPU fallback policy, and provides the synchronization point
//! used by latency measurement.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device, DeviceLocation};
use serde::{Deserialize, Serialize};

use super::error::InferenceError;

/// GPU Backend Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuBackend {
    /// NVIDIA CUDA backend
    Cuda,
    /// Apple Metal backend (macOS only)
    Metal,
    /// CPU fallback (no GPU)
    Cpu,
}

impl Default for GpuBackend {
    fn default() -> Self {
        Self::Cpu
    }
}

impl fmt::Display for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuBackend::Cuda => write!(f, "cuda"),
            GpuBackend::Metal => write!(f, "metal"),
            GpuBackend::Cpu => write!(f, "cpu"),
        }
    }
}

impl GpuBackend {
    /// Backend of an already constructed Candle device.
    pub fn of(device: &Device) -> Self {
        if device.is_cuda() {
            Self::Cuda
        } else if device.is_metal() {
            Self::Metal
        } else {
            Self::Cpu
        }
    }

    /// True for every backend that is not the host CPU.
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Self::Cpu)
    }

    /// Whether this build carries the runtime library for the backend.
    pub fn runtime_available(&self) -> bool {
        match self {
            Self::Cuda => candle_core::utils::cuda_is_available(),
            Self::Metal => candle_core::utils::metal_is_available(),
            Self::Cpu => true,
        }
    }
}

/// Target device as written in configuration, e.g. `cuda:0`, `metal`, `cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSpec {
    pub backend: GpuBackend,
    pub index: usize,
}

impl DeviceSpec {
    pub fn cpu() -> Self {
        Self {
            backend: GpuBackend::Cpu,
            index: 0,
        }
    }

    pub fn cuda(index: usize) -> Self {
        Self {
            backend: GpuBackend::Cuda,
            index,
        }
    }

    /// Spec of an already constructed Candle device.
    pub fn of(device: &Device) -> Self {
        match device.location() {
            DeviceLocation::Cpu => Self::cpu(),
            DeviceLocation::Cuda { gpu_id } => Self::cuda(gpu_id),
            DeviceLocation::Metal { gpu_id } => Self {
                backend: GpuBackend::Metal,
                index: gpu_id,
            },
        }
    }
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self::cuda(0)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend {
            GpuBackend::Cpu => write!(f, "cpu"),
            backend => write!(f, "{}:{}", backend, self.index),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = InferenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim().to_ascii_lowercase();
        let (name, index) = match raw.split_once(':') {
            Some((name, idx)) => {
                let index = idx.parse::<usize>().map_err(|_| {
                    InferenceError::Configuration(format!("invalid device index in '{}'", raw))
                })?;
                (name.to_string(), index)
            }
            None => (raw.clone(), 0),
        };

        let backend = match name.as_str() {
            "cuda" | "gpu" => GpuBackend::Cuda,
            "metal" | "mps" => GpuBackend::Metal,
            "cpu" => return Ok(Self::cpu()),
            other => {
                return Err(InferenceError::Configuration(format!(
                    "unknown device '{}'",
                    other
                )))
            }
        };
        Ok(Self { backend, index })
    }
}

/// Numeric precision the model runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    Fp16,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Fp32 => DType::F32,
            Self::Fp16 => DType::F16,
        }
    }

    /// Half precision is only honored on accelerators.
    pub fn for_device(fp16_requested: bool, device: &Device) -> Self {
        if fp16_requested && GpuBackend::of(device).is_accelerator() {
            Self::Fp16
        } else {
            Self::Fp32
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fp32 => write!(f, "fp32"),
            Self::Fp16 => write!(f, "fp16"),
        }
    }
}

impl FromStr for Precision {
    type Err = InferenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fp32" | "f32" | "float" => Ok(Self::Fp32),
            "fp16" | "f16" | "half" => Ok(Self::Fp16),
            other => Err(InferenceError::Configuration(format!(
                "unknown precision '{}'",
                other
            ))),
        }
    }
}

/// Resolve a device spec to a Candle device.
///
/// An unavailable accelerator degrades to the CPU when `allow_cpu_fallback`
/// is set and is a configuration error otherwise.
pub fn resolve_device(spec: DeviceSpec, allow_cpu_fallback: bool) -> Result<Device, InferenceError> {
    let attempt = match spec.backend {
        GpuBackend::Cpu => return Ok(Device::Cpu),
        GpuBackend::Cuda => Device::new_cuda(spec.index),
        GpuBackend::Metal => Device::new_metal(spec.index),
    };

    match attempt {
        Ok(device) => {
            tracing::info!(device = %spec, "Using accelerator device");
            Ok(device)
        }
        Err(e) if allow_cpu_fallback => {
            tracing::warn!(device = %spec, error = %e, "Accelerator unavailable, falling back to CPU");
            Ok(Device::Cpu)
        }
        Err(e) => Err(InferenceError::Configuration(format!(
            "{} device required but not available: {}",
            spec, e
        ))),
    }
}

/// Block until all queued work on `device` has completed.
///
/// A no-op on the CPU, where every operation is already synchronous.
pub fn synchronize(device: &Device) -> Result<(), InferenceError> {
    if GpuBackend::of(device).is_accelerator() {
        device.synchronize()?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "gpu_tests.rs"]
mod tests;
