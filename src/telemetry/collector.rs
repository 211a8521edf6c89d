// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Telemetry collector: one probed backend, repeated sampling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::{probe_backends, BackendCandidate, TelemetryBackend, TelemetryConfig};
use super::error::TelemetryError;
use super::metrics::record_telemetry_samples;
use super::sample::TelemetryResponse;

/// Owns the active telemetry backend for the lifetime of the process.
pub struct TelemetryCollector {
    backend: Mutex<Box<dyn TelemetryBackend>>,
    source: String,
    device: Option<String>,
    interval: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("source", &self.source)
            .field("device", &self.device)
            .field("interval", &self.interval)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TelemetryCollector {
    /// Probe DCGM, then NVML, then fall back to the stub.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_candidates(config.default_candidates(), config.interval)
    }

    /// Probe an explicit ordered candidate list.
    pub fn with_candidates(candidates: Vec<BackendCandidate>, interval: Duration) -> Self {
        Self::from_backend(probe_backends(candidates), interval)
    }

    /// Wrap an already constructed backend.
    pub fn from_backend(backend: Box<dyn TelemetryBackend>, interval: Duration) -> Self {
        Self {
            source: backend.source_name().to_string(),
            device: backend.device_name(),
            backend: Mutex::new(backend),
            interval,
            closed: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Take `num_samples` readings (at least one), sleeping `interval`
    /// between consecutive readings. Blocks the calling thread. A `close`
    /// that lands between readings ends the collection with `Closed`.
    pub fn collect(&self, num_samples: usize) -> Result<TelemetryResponse, TelemetryError> {
        if self.is_closed() {
            return Err(TelemetryError::Closed);
        }
        let count = num_samples.max(1);

        let mut samples = Vec::with_capacity(count);
        for idx in 0..count {
            if idx > 0 {
                std::thread::sleep(self.interval);
                if self.is_closed() {
                    return Err(TelemetryError::Closed);
                }
            }
            // The lock is held per reading only so `close` never waits out the sleeps.
            samples.push(self.backend.lock().sample()?);
        }

        record_telemetry_samples(&self.source, samples.len());
        tracing::debug!(source = %self.source, samples = samples.len(), "Telemetry collected");

        Ok(TelemetryResponse {
            samples,
            source: self.source.clone(),
            interval_s: self.interval.as_secs_f64(),
            device: self.device.clone(),
        })
    }

    /// Release the backend. Only the first call does anything.
    pub fn close(&self) -> Result<(), TelemetryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyClosed);
        }
        tracing::info!(source = %self.source, "Closing telemetry backend");
        self.backend.lock().close()
    }
}
