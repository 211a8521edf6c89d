// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Telemetry error types.

use thiserror::Error;

/// Errors raised while probing or sampling a telemetry backend.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The backend could not be initialized; probing moves on.
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// A steady-state read failed.
    #[error("Sample from '{backend}' failed: {reason}")]
    SampleFailed { backend: String, reason: String },

    #[error("Telemetry collector is closed")]
    Closed,

    #[error("Telemetry collector already closed")]
    AlreadyClosed,

    #[error("Sample count must be between {min} and {max}, got {got}")]
    InvalidSampleCount { got: usize, min: usize, max: usize },
}

impl TelemetryError {
    pub(crate) fn unavailable(backend: &str, reason: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sample_failed(backend: &str, reason: impl std::fmt::Display) -> Self {
        Self::SampleFailed {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }
}
