//! Health check support for the GAVID runtime.
//!
//! Readiness follows engine construction and shutdown state. Telemetry that
//! fell back to the stub backend degrades the report but never fails it.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineKind, InferenceEngine};
use crate::shutdown::ShutdownState;
use crate::telemetry::stub::STUB_SOURCE;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// What the health checker needs to know about a constructed engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub kind: EngineKind,
    pub device: String,
    pub model: String,
    pub preprocessor: String,
}

impl EngineSummary {
    pub fn of(engine: &InferenceEngine) -> Self {
        Self {
            kind: engine.kind(),
            device: engine.device_spec().to_string(),
            model: engine.model_name().to_string(),
            preprocessor: engine.preprocessor_name().to_string(),
        }
    }
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_requests: bool,
    pub engine_loaded: bool,
    pub engine: Option<EngineSummary>,
    pub telemetry_source: Option<String>,
    pub in_flight: usize,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub require_engine_loaded: bool,
    pub degrade_on_stub_telemetry: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            require_engine_loaded: true,
            degrade_on_stub_telemetry: true,
        }
    }
}

/// Aggregates health information from runtime components.
#[derive(Debug)]
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Check liveness: process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Check readiness: accepting traffic with an engine to serve it.
    pub fn is_ready(&self, shutdown_state: ShutdownState, engine_loaded: bool) -> bool {
        shutdown_state == ShutdownState::Running
            && (engine_loaded || !self.config.require_engine_loaded)
    }

    /// Generate full health report.
    pub fn report(
        &self,
        shutdown_state: ShutdownState,
        engine: Option<EngineSummary>,
        telemetry_source: Option<&str>,
        in_flight: usize,
    ) -> HealthReport {
        let engine_loaded = engine.is_some();
        HealthReport {
            state: self.compute_state(shutdown_state, engine_loaded, telemetry_source),
            ready: self.is_ready(shutdown_state, engine_loaded),
            accepting_requests: shutdown_state == ShutdownState::Running,
            engine_loaded,
            engine,
            telemetry_source: telemetry_source.map(str::to_string),
            in_flight,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(
        &self,
        shutdown_state: ShutdownState,
        engine_loaded: bool,
        telemetry_source: Option<&str>,
    ) -> HealthState {
        if shutdown_state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if self.config.require_engine_loaded && !engine_loaded {
            return HealthState::Unhealthy;
        }
        if self.config.degrade_on_stub_telemetry && telemetry_source == Some(STUB_SOURCE) {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> EngineSummary {
        EngineSummary {
            kind: EngineKind::Eager,
            device: "cpu".into(),
            model: "resnet18".into(),
            preprocessor: "host".into(),
        }
    }

    #[test]
    fn test_healthy_with_engine_and_real_telemetry() {
        let report =
            HealthChecker::default().report(ShutdownState::Running, Some(summary()), Some("nvml"), 0);
        assert_eq!(report.state, HealthState::Healthy);
        assert!(report.ready);
        assert!(report.engine_loaded);
    }

    #[test]
    fn test_stub_telemetry_degrades() {
        let report =
            HealthChecker::default().report(ShutdownState::Running, Some(summary()), Some("stub"), 0);
        assert_eq!(report.state, HealthState::Degraded);
        assert!(report.ready);
    }

    #[test]
    fn test_missing_engine_is_unhealthy() {
        let report = HealthChecker::default().report(ShutdownState::Running, None, Some("stub"), 0);
        assert_eq!(report.state, HealthState::Unhealthy);
        assert!(!report.ready);
        assert!(report.accepting_requests);
    }

    #[test]
    fn test_draining_is_unhealthy() {
        let report =
            HealthChecker::default().report(ShutdownState::Draining, Some(summary()), None, 3);
        assert_eq!(report.state, HealthState::Unhealthy);
        assert!(!report.accepting_requests);
        assert_eq!(report.in_flight, 3);
    }
}
