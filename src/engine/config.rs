// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Engine construction settings.
//!
//! All fields have safe defaults. Configuration is validated before use.

use std::path::PathBuf;

use super::error::InferenceError;
use super::gpu::DeviceSpec;

/// Default artifact location, relative to the working directory.
pub const DEFAULT_ENGINE_PATH: &str = "artifacts/resnet18_fp16_engine.safetensors";

/// Settings consumed by `InferenceEngine::from_config`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Target device, e.g. `cuda:0`.
    pub device: DeviceSpec,
    /// Run at half precision when the device is an accelerator.
    pub model_fp16: bool,
    /// Largest batch the compiled artifact accepts.
    pub max_batch_size: usize,
    /// Degrade to the CPU instead of failing when the accelerator is missing.
    pub allow_cpu_fallback: bool,
    /// Where the compiled artifact is cached.
    pub engine_path: PathBuf,
    /// Local checkpoint used when no pretrained bundle exists.
    pub model_weights: Option<PathBuf>,
    pub model_dir: PathBuf,
    pub model_repo: String,
    /// Rebuild the artifact even if the file exists.
    pub force_compile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: DeviceSpec::default(),
            model_fp16: true,
            max_batch_size: 8,
            allow_cpu_fallback: true,
            engine_path: PathBuf::from(DEFAULT_ENGINE_PATH),
            model_weights: None,
            model_dir: PathBuf::from("models"),
            model_repo: "resnet18".to_string(),
            force_compile: false,
        }
    }
}

impl EngineConfig {
    /// Validate configuration values. Returns error on invalid values.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.max_batch_size == 0 {
            return Err(InferenceError::Configuration(
                "max_batch_size must be >= 1".into(),
            ));
        }
        if self.model_repo.trim().is_empty() {
            return Err(InferenceError::Configuration(
                "model_repo must not be empty".into(),
            ));
        }
        if self.engine_path.as_os_str().is_empty() {
            return Err(InferenceError::Configuration(
                "engine_path must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Copy with the device forced to the CPU, as used for baselines.
    pub fn on_cpu(&self) -> Self {
        Self {
            device: DeviceSpec::cpu(),
            ..self.clone()
        }
    }
}
