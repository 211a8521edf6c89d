// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Synthetic backend used when no hardware telemetry is reachable.

use super::backend::TelemetryBackend;
use super::error::TelemetryError;
use super::sample::{now_epoch_s, MetricSample};

/// Source name reported by the synthetic backend.
pub const STUB_SOURCE: &str = "stub";

/// Deterministic readings that oscillate over a ten second period.
#[derive(Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }

    /// Reading for a given epoch time.
    pub fn sample_at(now: f64) -> MetricSample {
        let phase = (now % 10.0) / 10.0;
        let util = 20.0 + 5.0 * (1.0 + phase);
        MetricSample {
            gpu_util: util,
            mem_util: util / 2.0,
            memory_used_mb: 1024.0,
            memory_total_mb: 8192.0,
            power_w: 150.0 + 10.0 * phase,
            power_limit_w: 250.0,
            temperature_c: 45.0 + 2.0 * phase,
            timestamp: now,
        }
    }
}

impl TelemetryBackend for StubBackend {
    fn sample(&mut self) -> Result<MetricSample, TelemetryError> {
        Ok(Self::sample_at(now_epoch_s()))
    }

    fn source_name(&self) -> &str {
        STUB_SOURCE
    }

    fn device_name(&self) -> Option<String> {
        Some("virtual-gpu".to_string())
    }
}
