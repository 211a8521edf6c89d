// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Inference error types for the GAVID engine.
//!
//! Construction failures are fatal; per-request failures stay with the request.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building the engine or running a prediction.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Compilation unavailable: {0}")]
    CompilationUnavailable(String),

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Artifact error at {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InferenceError {
    /// Returns true if the error happened while constructing the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Artifact { .. } | Self::Io(_)
        )
    }

    /// Returns true if the caller sent a payload that can never succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_))
    }

    /// Stable short name used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidImage(_) => "invalid_image",
            Self::Configuration(_) => "configuration",
            Self::CompilationUnavailable(_) => "compilation_unavailable",
            Self::ExecutionFailure(_) => "execution_failure",
            Self::Artifact { .. } => "artifact",
            Self::Io(_) => "io",
        }
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Artifact {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<candle_core::Error> for InferenceError {
    fn from(err: candle_core::Error) -> Self {
        Self::ExecutionFailure(err.to_string())
    }
}

impl From<safetensors::SafeTensorError> for InferenceError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        Self::ExecutionFailure(format!("safetensors: {}", err))
    }
}
