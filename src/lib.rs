//! GAVID Core Runtime
//!
//! GPU-accelerated image classification with a compiled-artifact cache,
//! plus GPU hardware telemetry.
//!
//! # Components
//!
//! - **Engine**: one process-wide `InferenceEngine`, built lazily on first
//!   use. Runs a cached compiled graph when the device supports it, the eager
//!   model otherwise.
//! - **Telemetry**: one `TelemetryCollector`, probing DCGM, then NVML, then a
//!   synthetic stub. Closed exactly once at shutdown.
//! - **Runtime**: async facade that schedules blocking work on the tokio
//!   blocking pool and coordinates graceful shutdown.

pub mod cli;
pub mod config;
pub mod engine;
pub mod health;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use engine::{EngineConfig, InferenceEngine, InferenceError, InferenceResult, SharedSlot};
use health::{EngineSummary, HealthChecker, HealthReport};
use shutdown::{ShutdownCoordinator, ShutdownResult};
use telemetry::metrics::{record_inference_failure, record_inference_success};
use telemetry::{
    RequestSpan, SampleCount, SpanExt, TelemetryCollector, TelemetryConfig, TelemetryError,
    TelemetryResponse,
};

/// Errors surfaced by the runtime facade.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Runtime is shutting down")]
    ShuttingDown,

    #[error("Blocking task failed: {0}")]
    TaskFailed(String),
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub telemetry: TelemetryConfig,
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            telemetry: TelemetryConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<config::EnvConfig> for RuntimeConfig {
    fn from(env: config::EnvConfig) -> Self {
        Self {
            engine: env.engine,
            telemetry: env.telemetry,
            shutdown_timeout: env.shutdown_timeout,
        }
    }
}

type EngineFactory = Box<dyn Fn() -> Result<InferenceEngine, InferenceError> + Send + Sync>;
type TelemetryFactory = Box<dyn Fn() -> TelemetryCollector + Send + Sync>;

/// The GAVID runtime instance.
pub struct Runtime {
    config: RuntimeConfig,
    engine: SharedSlot<InferenceEngine>,
    telemetry: SharedSlot<TelemetryCollector>,
    engine_factory: EngineFactory,
    telemetry_factory: TelemetryFactory,
    shutdown: ShutdownCoordinator,
    health: HealthChecker,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("engine", &self.engine.get())
            .field("telemetry", &self.telemetry.get())
            .field("shutdown", &self.shutdown.state())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime whose engine and telemetry are built from `config`.
    pub fn new(config: RuntimeConfig) -> Self {
        let engine_config = config.engine.clone();
        let telemetry_config = config.telemetry.clone();
        Self::with_factories(
            config,
            move || InferenceEngine::from_config(&engine_config),
            move || TelemetryCollector::new(&telemetry_config),
        )
    }

    /// Create a runtime with custom constructors for the shared components.
    pub fn with_factories<E, T>(config: RuntimeConfig, engine_factory: E, telemetry_factory: T) -> Self
    where
        E: Fn() -> Result<InferenceEngine, InferenceError> + Send + Sync + 'static,
        T: Fn() -> TelemetryCollector + Send + Sync + 'static,
    {
        Self {
            config,
            engine: SharedSlot::new(),
            telemetry: SharedSlot::new(),
            engine_factory: Box::new(engine_factory),
            telemetry_factory: Box::new(telemetry_factory),
            shutdown: ShutdownCoordinator::new(),
            health: HealthChecker::default(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// The shared engine, built on first call. A failed build leaves the
    /// slot empty so a later call retries.
    pub fn engine(&self) -> Result<Arc<InferenceEngine>, InferenceError> {
        self.engine.get_or_try_init(|| {
            let engine = (self.engine_factory)();
            if let Err(e) = &engine {
                tracing::error!(error = %e, "Inference engine construction failed");
            }
            engine
        })
    }

    /// The shared telemetry collector, probed on first call.
    pub fn telemetry(&self) -> Arc<TelemetryCollector> {
        match self
            .telemetry
            .get_or_try_init::<std::convert::Infallible, _>(|| Ok((self.telemetry_factory)()))
        {
            Ok(collector) => collector,
            Err(never) => match never {},
        }
    }

    /// Classify one encoded image on the blocking pool.
    pub async fn predict(self: &Arc<Self>, image_bytes: Vec<u8>) -> Result<InferenceResult, RuntimeError> {
        let guard = self.shutdown.track().ok_or(RuntimeError::ShuttingDown)?;
        let span = RequestSpan::predict(&RequestSpan::new_id());
        let runtime = Arc::clone(self);
        let task_span = span.clone();

        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let _enter = task_span.enter();
            let engine = match runtime.engine() {
                Ok(engine) => engine,
                Err(e) => {
                    record_inference_failure("unavailable", e.kind());
                    return Err(e);
                }
            };
            let engine_name = engine.kind().as_str();
            task_span.record("engine", engine_name);
            match engine.predict(&image_bytes) {
                Ok(result) => {
                    record_inference_success(engine_name, result.latency_ms);
                    task_span.record("latency_ms", result.latency_ms);
                    Ok(result)
                }
                Err(e) => {
                    record_inference_failure(engine_name, e.kind());
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| RuntimeError::TaskFailed(e.to_string()))?;

        span.record_result(&result);
        Ok(result?)
    }

    /// Take `count` telemetry samples on the blocking pool.
    pub async fn collect(self: &Arc<Self>, count: SampleCount) -> Result<TelemetryResponse, RuntimeError> {
        let guard = self.shutdown.track().ok_or(RuntimeError::ShuttingDown)?;
        let span = RequestSpan::collect(&RequestSpan::new_id(), count.get());
        let runtime = Arc::clone(self);
        let task_span = span.clone();

        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let _enter = task_span.enter();
            let collector = runtime.telemetry();
            task_span.record("source", collector.source());
            collector.collect(count.get())
        })
        .await
        .map_err(|e| RuntimeError::TaskFailed(e.to_string()))?;

        span.record_result(&result);
        Ok(result?)
    }

    /// Snapshot without forcing construction of anything.
    pub fn health_report(&self) -> HealthReport {
        let engine = self.engine.get().map(|e| EngineSummary::of(&e));
        let telemetry = self.telemetry.get();
        self.health.report(
            self.shutdown.state(),
            engine,
            telemetry.as_deref().map(TelemetryCollector::source),
            self.shutdown.in_flight_count(),
        )
    }

    /// Stop accepting work, drain in-flight requests, then release the
    /// telemetry backend if one was ever opened.
    pub async fn shutdown(&self) -> Result<ShutdownResult, RuntimeError> {
        let result = self.shutdown.initiate(self.config.shutdown_timeout).await;
        if let ShutdownResult::Timeout { remaining } = result {
            tracing::warn!(remaining, "Closing telemetry with requests still running");
        }

        if let Some(collector) = self.telemetry.get() {
            let closed = tokio::task::spawn_blocking(move || collector.close())
                .await
                .map_err(|e| RuntimeError::TaskFailed(e.to_string()))?;
            match closed {
                Ok(()) | Err(TelemetryError::AlreadyClosed) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!("Runtime stopped");
        Ok(result)
    }
}
