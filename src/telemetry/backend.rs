// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Telemetry backend abstraction and startup probing.

use std::path::PathBuf;
use std::time::Duration;

use super::dcgm::{DcgmBackend, DcgmConfig, DEFAULT_FIELD_IDS};
use super::error::TelemetryError;
use super::nvml::NvmlBackend;
use super::sample::MetricSample;
use super::stub::StubBackend;

/// A source of GPU readings.
pub trait TelemetryBackend: Send {
    fn sample(&mut self) -> Result<MetricSample, TelemetryError>;

    /// Release the underlying session. Called once by the collector.
    fn close(&mut self) -> Result<(), TelemetryError> {
        Ok(())
    }

    /// Short identifier reported as `source`.
    fn source_name(&self) -> &str;

    fn device_name(&self) -> Option<String> {
        None
    }
}

type BackendFactory = Box<dyn FnOnce() -> Result<Box<dyn TelemetryBackend>, TelemetryError> + Send>;

/// A named constructor tried during probing.
pub struct BackendCandidate {
    name: String,
    factory: BackendFactory,
}

impl BackendCandidate {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn TelemetryBackend>, TelemetryError> + Send + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for BackendCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCandidate").field("name", &self.name).finish()
    }
}

/// Try each candidate in order and keep the first that initializes.
///
/// Never fails: when every candidate errors the stub backend is returned.
pub fn probe_backends(candidates: Vec<BackendCandidate>) -> Box<dyn TelemetryBackend> {
    for candidate in candidates {
        let name = candidate.name;
        match (candidate.factory)() {
            Ok(backend) => {
                tracing::info!(backend = %name, device = ?backend.device_name(), "Telemetry backend selected");
                return backend;
            }
            Err(e) => {
                tracing::debug!(backend = %name, error = %e, "Telemetry backend unavailable");
            }
        }
    }
    tracing::info!(backend = "stub", "No hardware telemetry available, using stub backend");
    Box::new(StubBackend::new())
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Pause between consecutive samples of one `collect` call.
    pub interval: Duration,
    pub gpu_index: u32,
    pub dcgmi_path: PathBuf,
    pub dcgm_field_ids: Vec<u16>,
    /// How long DCGM may take to deliver its first row.
    pub dcgm_startup_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            gpu_index: 0,
            dcgmi_path: PathBuf::from("dcgmi"),
            dcgm_field_ids: DEFAULT_FIELD_IDS.to_vec(),
            dcgm_startup_timeout: Duration::from_secs(5),
        }
    }
}

impl TelemetryConfig {
    /// DCGM first, then NVML.
    pub fn default_candidates(&self) -> Vec<BackendCandidate> {
        let dcgm = DcgmConfig {
            dcgmi_path: self.dcgmi_path.clone(),
            field_ids: self.dcgm_field_ids.clone(),
            gpu_index: self.gpu_index,
            update_interval: self.interval,
            startup_timeout: self.dcgm_startup_timeout,
        };
        let gpu_index = self.gpu_index;
        vec![
            BackendCandidate::new("dcgm", move || {
                Ok(Box::new(DcgmBackend::start(dcgm)?) as Box<dyn TelemetryBackend>)
            }),
            BackendCandidate::new("nvml", move || {
                Ok(Box::new(NvmlBackend::new(gpu_index)?) as Box<dyn TelemetryBackend>)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl TelemetryBackend for Fixed {
        fn sample(&mut self) -> Result<MetricSample, TelemetryError> {
            Err(TelemetryError::sample_failed(self.0, "not sampled in this test"))
        }

        fn source_name(&self) -> &str {
            self.0
        }
    }

    fn failing(name: &'static str) -> BackendCandidate {
        BackendCandidate::new(name, move || Err(TelemetryError::unavailable(name, "missing")))
    }

    fn working(name: &'static str) -> BackendCandidate {
        BackendCandidate::new(name, move || Ok(Box::new(Fixed(name)) as Box<dyn TelemetryBackend>))
    }

    #[test]
    fn test_first_success_wins() {
        let backend = probe_backends(vec![failing("a"), working("b"), working("c")]);
        assert_eq!(backend.source_name(), "b");
    }

    #[test]
    fn test_all_failures_yield_stub() {
        let backend = probe_backends(vec![failing("a"), failing("b")]);
        assert_eq!(backend.source_name(), "stub");
        assert_eq!(backend.device_name().as_deref(), Some("virtual-gpu"));
    }

    #[test]
    fn test_empty_list_yields_stub() {
        assert_eq!(probe_backends(Vec::new()).source_name(), "stub");
    }

    #[test]
    fn test_default_candidate_order() {
        let names: Vec<String> = TelemetryConfig::default()
            .default_candidates()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["dcgm", "nvml"]);
    }
}
