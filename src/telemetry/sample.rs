// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Telemetry sample and response types.

use serde::{Deserialize, Serialize};

use super::error::TelemetryError;

/// One reading of the monitored GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Percent of time a kernel was running.
    pub gpu_util: f64,
    /// Percent of time device memory was being read or written.
    pub mem_util: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub power_w: f64,
    pub power_limit_w: f64,
    pub temperature_c: f64,
    /// Unix epoch seconds.
    pub timestamp: f64,
}

/// Current time as Unix epoch seconds with sub-second precision.
pub fn now_epoch_s() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Result of one `collect` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryResponse {
    pub samples: Vec<MetricSample>,
    pub source: String,
    pub interval_s: f64,
    pub device: Option<String>,
}

/// Validated number of samples requested at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCount(usize);

impl SampleCount {
    pub const MIN: usize = 1;
    pub const MAX: usize = 120;

    pub fn new(n: usize) -> Result<Self, TelemetryError> {
        if (Self::MIN..=Self::MAX).contains(&n) {
            Ok(Self(n))
        } else {
            Err(TelemetryError::InvalidSampleCount {
                got: n,
                min: Self::MIN,
                max: Self::MAX,
            })
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for SampleCount {
    fn default() -> Self {
        Self(Self::MIN)
    }
}
