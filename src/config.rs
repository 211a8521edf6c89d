//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `GAVID_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GAVID_DEVICE` | cuda:0 | Target device (`cuda:N`, `metal:N`, `cpu`) |
//! | `GAVID_MODEL_FP16` | true | Half precision on accelerators |
//! | `GAVID_MAX_BATCH_SIZE` | 8 | Compiled artifact max batch |
//! | `GAVID_ALLOW_CPU_FALLBACK` | true | Use the CPU when the accelerator is missing |
//! | `GAVID_METRICS_INTERVAL_S` | 2.0 | Pause between telemetry samples (secs) |
//! | `GAVID_MODEL_ENGINE_PATH` | artifacts/resnet18_fp16_engine.safetensors | Compiled artifact path |
//! | `GAVID_MODEL_WEIGHTS` | unset | Local weight file |
//! | `GAVID_MODEL_DIR` | models | Pretrained bundle directory |
//! | `GAVID_MODEL_REPO` | resnet18 | Pretrained bundle name |
//! | `GAVID_DCGM_FIELD_IDS` | 203,204,252,250,155,160,150 | DCGM fields |
//! | `GAVID_DCGMI_PATH` | dcgmi | DCGM command-line binary |
//! | `GAVID_GPU_INDEX` | 0 | Telemetry device index |
//! | `GAVID_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |
//! | `GAVID_LOG` / `RUST_LOG` | info | Log filter |
//! | `GAVID_LOG_FORMAT` | pretty | `pretty` or `json` |
//! | `GAVID_LOG_FILE` | unset | Write logs to this file |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::engine::config::DEFAULT_ENGINE_PATH;
use crate::engine::{DeviceSpec, EngineConfig};
use crate::telemetry::dcgm::DEFAULT_FIELD_IDS;
use crate::telemetry::{LogConfig, LogFormat, TelemetryConfig};

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub device: String,
    pub model_fp16: bool,
    pub max_batch_size: usize,
    pub allow_cpu_fallback: bool,
    pub metrics_interval_s: f64,
    pub engine_path: String,
    pub model_weights: Option<String>,
    pub model_dir: String,
    pub model_repo: String,
    pub dcgm_field_ids: String,
    pub dcgmi_path: String,
    pub gpu_index: u32,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_format: String,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub engine: EngineConfig,
    pub telemetry: TelemetryConfig,
    pub log: LogConfig,
    pub shutdown_timeout: Duration,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a finite `f64` env var, returning `default` on missing or invalid.
fn parse_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a boolean env var (`true/false`, `1/0`, `yes/no`, `on/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Non-empty string env var.
fn parse_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_field_ids(key: &str) -> Vec<u16> {
    let parsed = parse_string(key).and_then(|raw| {
        raw.split(',')
            .map(|t| t.trim().parse::<u16>().ok())
            .collect::<Option<Vec<u16>>>()
    });
    match parsed {
        Some(ids) if !ids.is_empty() => ids,
        _ => DEFAULT_FIELD_IDS.to_vec(),
    }
}

/// Resolve a relative path against the working directory.
pub fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Load inference engine configuration from environment.
fn load_engine_config() -> EngineConfig {
    let device = parse_string("GAVID_DEVICE")
        .and_then(|raw| raw.parse::<DeviceSpec>().ok())
        .unwrap_or_default();
    let max_batch_size = parse_usize("GAVID_MAX_BATCH_SIZE", 8).max(1);
    let engine_path = parse_string("GAVID_MODEL_ENGINE_PATH").unwrap_or_else(|| DEFAULT_ENGINE_PATH.to_string());

    EngineConfig {
        device,
        model_fp16: parse_bool("GAVID_MODEL_FP16", true),
        max_batch_size,
        allow_cpu_fallback: parse_bool("GAVID_ALLOW_CPU_FALLBACK", true),
        engine_path: absolutize(PathBuf::from(engine_path)),
        model_weights: parse_string("GAVID_MODEL_WEIGHTS").map(PathBuf::from),
        model_dir: PathBuf::from(parse_string("GAVID_MODEL_DIR").unwrap_or_else(|| "models".to_string())),
        model_repo: parse_string("GAVID_MODEL_REPO").unwrap_or_else(|| "resnet18".to_string()),
        force_compile: false,
    }
}

const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(2);

/// Load telemetry configuration from environment.
fn load_telemetry_config() -> TelemetryConfig {
    let interval_s = parse_f64("GAVID_METRICS_INTERVAL_S", DEFAULT_METRICS_INTERVAL.as_secs_f64()).max(0.0);
    TelemetryConfig {
        interval: Duration::try_from_secs_f64(interval_s).unwrap_or(DEFAULT_METRICS_INTERVAL),
        gpu_index: parse_u32("GAVID_GPU_INDEX", 0),
        dcgmi_path: PathBuf::from(parse_string("GAVID_DCGMI_PATH").unwrap_or_else(|| "dcgmi".to_string())),
        dcgm_field_ids: parse_field_ids("GAVID_DCGM_FIELD_IDS"),
        ..TelemetryConfig::default()
    }
}

/// Load logging configuration from environment.
fn load_log_config() -> LogConfig {
    let level = parse_string("GAVID_LOG")
        .or_else(|| parse_string("RUST_LOG"))
        .unwrap_or_else(|| "info".to_string());
    let format = parse_string("GAVID_LOG_FORMAT")
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    LogConfig {
        format,
        level,
        output_path: parse_string("GAVID_LOG_FILE").map(PathBuf::from),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let shutdown_secs = parse_u64("GAVID_SHUTDOWN_TIMEOUT", 30).max(1);

    EnvConfig {
        engine: load_engine_config(),
        telemetry: load_telemetry_config(),
        log: load_log_config(),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            device: self.engine.device.to_string(),
            model_fp16: self.engine.model_fp16,
            max_batch_size: self.engine.max_batch_size,
            allow_cpu_fallback: self.engine.allow_cpu_fallback,
            metrics_interval_s: self.telemetry.interval.as_secs_f64(),
            engine_path: display_path(&self.engine.engine_path),
            model_weights: self.engine.model_weights.as_deref().map(display_path),
            model_dir: display_path(&self.engine.model_dir),
            model_repo: self.engine.model_repo.clone(),
            dcgm_field_ids: self
                .telemetry
                .dcgm_field_ids
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(","),
            dcgmi_path: display_path(&self.telemetry.dcgmi_path),
            gpu_index: self.telemetry.gpu_index,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_level: self.log.level.clone(),
            log_format: match self.log.format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Pretty => "pretty".to_string(),
            },
        }
    }
}
