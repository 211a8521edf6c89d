// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! NVML backend (requires the `nvml` feature).

#[cfg(feature = "nvml")]
use super::sample::now_epoch_s;
use super::backend::TelemetryBackend;
use super::error::TelemetryError;
use super::sample::MetricSample;

const SOURCE: &str = "nvml";

#[cfg(feature = "nvml")]
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Basic telemetry from the NVIDIA Management Library.
#[cfg(feature = "nvml")]
pub struct NvmlBackend {
    nvml: Option<nvml_wrapper::Nvml>,
    index: u32,
    name: Option<String>,
}

#[cfg(feature = "nvml")]
impl NvmlBackend {
    pub fn new(index: u32) -> Result<Self, TelemetryError> {
        let nvml = nvml_wrapper::Nvml::init().map_err(|e| TelemetryError::unavailable(SOURCE, format!("{:?}", e)))?;
        let name = {
            let device = nvml
                .device_by_index(index)
                .map_err(|e| TelemetryError::unavailable(SOURCE, format!("device {}: {:?}", index, e)))?;
            device.name().ok()
        };
        Ok(Self {
            nvml: Some(nvml),
            index,
            name,
        })
    }
}

#[cfg(feature = "nvml")]
impl TelemetryBackend for NvmlBackend {
    fn sample(&mut self) -> Result<MetricSample, TelemetryError> {
        use nvml_wrapper::enum_wrappers::device::TemperatureSensor;

        let failed = |e: nvml_wrapper::error::NvmlError| TelemetryError::sample_failed(SOURCE, format!("{:?}", e));
        let nvml = self.nvml.as_ref().ok_or(TelemetryError::Closed)?;
        let device = nvml.device_by_index(self.index).map_err(failed)?;

        let util = device.utilization_rates().map_err(failed)?;
        let memory = device.memory_info().map_err(failed)?;
        let power_mw = device.power_usage().map_err(failed)?;
        let limit_mw = device.enforced_power_limit().map_err(failed)?;
        let temperature = device.temperature(TemperatureSensor::Gpu).map_err(failed)?;

        Ok(MetricSample {
            gpu_util: util.gpu as f64,
            mem_util: util.memory as f64,
            memory_used_mb: memory.used as f64 / BYTES_PER_MIB,
            memory_total_mb: memory.total as f64 / BYTES_PER_MIB,
            power_w: power_mw as f64 / 1000.0,
            power_limit_w: limit_mw as f64 / 1000.0,
            temperature_c: temperature as f64,
            timestamp: now_epoch_s(),
        })
    }

    fn close(&mut self) -> Result<(), TelemetryError> {
        match self.nvml.take() {
            Some(nvml) => nvml
                .shutdown()
                .map_err(|e| TelemetryError::sample_failed(SOURCE, format!("shutdown: {:?}", e))),
            None => Ok(()),
        }
    }

    fn source_name(&self) -> &str {
        SOURCE
    }

    fn device_name(&self) -> Option<String> {
        self.name.clone()
    }
}

/// Placeholder for builds without NVML; construction always fails.
#[cfg(not(feature = "nvml"))]
pub struct NvmlBackend {
    _private: (),
}

#[cfg(not(feature = "nvml"))]
impl NvmlBackend {
    pub fn new(_index: u32) -> Result<Self, TelemetryError> {
        Err(TelemetryError::unavailable(SOURCE, "built without the 'nvml' feature"))
    }
}

#[cfg(not(feature = "nvml"))]
impl TelemetryBackend for NvmlBackend {
    fn sample(&mut self) -> Result<MetricSample, TelemetryError> {
        Err(TelemetryError::sample_failed(SOURCE, "built without the 'nvml' feature"))
    }

    fn source_name(&self) -> &str {
        SOURCE
    }
}
