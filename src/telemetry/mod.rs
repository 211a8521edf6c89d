// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Telemetry module for GAVID Core.
//!
//! GPU hardware telemetry (DCGM, NVML, stub) plus the ambient structured
//! logging, request spans and metrics facade.

pub mod backend;
pub mod collector;
pub mod dcgm;
mod error;
mod logging;
pub mod metrics;
pub mod nvml;
mod sample;
mod spans;
pub mod stub;

pub use backend::{probe_backends, BackendCandidate, TelemetryBackend, TelemetryConfig};
pub use collector::TelemetryCollector;
pub use dcgm::{DcgmBackend, DcgmConfig};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::init_metrics;
pub use nvml::NvmlBackend;
pub use sample::{now_epoch_s, MetricSample, SampleCount, TelemetryResponse};
pub use spans::{RequestSpan, SpanExt};
pub use stub::StubBackend;
