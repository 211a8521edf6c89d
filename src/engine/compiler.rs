// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Accelerated graph compilation.
//!
//! `GraphCompiler` is the seam between the artifact cache and whatever turns
//! a model into a hardware-specific execution graph. `FusedGraphCompiler`
//! folds batch norm into the convolutions, casts to the profile precision and
//! serializes the result as safetensors with the profile in the header.

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::{Device, Tensor};
use safetensors::SafeTensors;

use super::artifact::CompileProfile;
use super::error::InferenceError;
use super::gpu::GpuBackend;
use super::model::ClassifierModel;
use super::resnet::{ResNet18, ResNetForm};

/// Header key naming the artifact layout.
pub const FORMAT_KEY: &str = "format";
pub const FUSED_FORMAT: &str = "gavid-fused-resnet18";

/// A deserialized execution graph.
pub struct LoadedGraph {
    pub model: Arc<dyn ClassifierModel>,
    /// Profile recorded in the artifact, when it carries one.
    pub profile: Option<CompileProfile>,
}

/// Builds and reloads serialized execution graphs.
pub trait GraphCompiler: Send + Sync {
    fn name(&self) -> &str;

    /// `Err(CompilationUnavailable)` when `device` cannot host a compiled graph.
    fn check_available(&self, device: &Device) -> Result<(), InferenceError>;

    fn compile(&self, profile: &CompileProfile) -> Result<Vec<u8>, InferenceError>;

    fn load(&self, bytes: &[u8], device: &Device) -> Result<LoadedGraph, InferenceError>;
}

/// Batch-norm folding compiler for ResNet-18.
pub struct FusedGraphCompiler {
    network: Arc<ResNet18>,
}

impl FusedGraphCompiler {
    pub fn new(network: Arc<ResNet18>) -> Self {
        Self { network }
    }
}

impl GraphCompiler for FusedGraphCompiler {
    fn name(&self) -> &str {
        "fused"
    }

    fn check_available(&self, device: &Device) -> Result<(), InferenceError> {
        let backend = GpuBackend::of(device);
        if backend.is_accelerator() && backend.runtime_available() {
            Ok(())
        } else {
            Err(InferenceError::CompilationUnavailable(format!(
                "fused graphs target accelerators, device is {}",
                backend
            )))
        }
    }

    fn compile(&self, profile: &CompileProfile) -> Result<Vec<u8>, InferenceError> {
        let fused = self.network.fuse(profile.precision.dtype())?;
        let tensors = fused
            .export()?
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_device(&Device::Cpu)?)))
            .collect::<Result<HashMap<String, Tensor>, InferenceError>>()?;

        let mut metadata = profile.to_metadata();
        metadata.insert(FORMAT_KEY.into(), FUSED_FORMAT.into());
        Ok(safetensors::serialize(&tensors, &Some(metadata))?)
    }

    fn load(&self, bytes: &[u8], device: &Device) -> Result<LoadedGraph, InferenceError> {
        read_fused_graph(bytes, device)
    }
}

/// Deserialize a fused artifact onto `device`.
pub fn read_fused_graph(bytes: &[u8], device: &Device) -> Result<LoadedGraph, InferenceError> {
    let (_, header) = SafeTensors::read_metadata(bytes)?;
    let metadata = header.metadata().clone().unwrap_or_default();
    if let Some(format) = metadata.get(FORMAT_KEY) {
        if format != FUSED_FORMAT {
            return Err(InferenceError::ExecutionFailure(format!(
                "unexpected artifact format '{}'",
                format
            )));
        }
    }
    let profile = CompileProfile::from_metadata(&metadata);

    let tensors = candle_core::safetensors::load_buffer(bytes, device)?;
    let dtype = match &profile {
        Some(p) => p.precision.dtype(),
        None => tensors
            .get("conv1.weight")
            .map(|t| t.dtype())
            .ok_or_else(|| InferenceError::ExecutionFailure("artifact has no conv1.weight".into()))?,
    };

    let network = ResNet18::from_weights(&tensors, dtype)?;
    if network.form() != ResNetForm::Fused {
        return Err(InferenceError::ExecutionFailure(
            "artifact holds an unfused network".into(),
        ));
    }
    Ok(LoadedGraph {
        model: Arc::new(network),
        profile,
    })
}
