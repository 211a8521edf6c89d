// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables
//! and never construct the engine.

use crate::config::{self, EffectiveConfig, EnvConfig};
use crate::engine::{EngineConfig, GpuBackend};
use crate::telemetry::{LogConfig, TelemetryConfig};

use super::{EXIT_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

/// Print effective config to stdout.
pub fn run_show(json: bool) -> i32 {
    print_config(&config::load().effective_config(), json)
}

/// Print built-in defaults, ignoring the environment.
pub fn run_defaults(json: bool) -> i32 {
    let defaults = EnvConfig {
        engine: EngineConfig::default(),
        telemetry: TelemetryConfig::default(),
        log: LogConfig::default(),
        shutdown_timeout: std::time::Duration::from_secs(30),
    };
    print_config(&defaults.effective_config(), json)
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 2 on an invalid engine configuration, 1 if only
/// warnings are found.
pub fn run_validate() -> i32 {
    let env = config::load();
    if let Err(e) = env.engine.validate() {
        eprintln!("ERROR: {}", e);
        return EXIT_CONFIG;
    }

    let warnings = collect_warnings(&env);
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }

    if warnings.is_empty() {
        println!("Configuration is valid.");
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

fn collect_warnings(env: &EnvConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    let backend = env.engine.device.backend;
    if backend.is_accelerator() && !backend.runtime_available() {
        if env.engine.allow_cpu_fallback {
            warnings.push(format!(
                "GAVID_DEVICE={} but this build has no {} support; the engine will run on the CPU",
                env.engine.device, backend
            ));
        } else {
            warnings.push(format!(
                "GAVID_DEVICE={} is unavailable in this build and GAVID_ALLOW_CPU_FALLBACK=false",
                env.engine.device
            ));
        }
    }

    if backend == GpuBackend::Cpu && env.engine.model_fp16 {
        warnings.push("GAVID_MODEL_FP16 is ignored on the CPU".to_string());
    }

    if env.telemetry.dcgm_field_ids.is_empty() {
        warnings.push("GAVID_DCGM_FIELD_IDS is empty; DCGM telemetry is disabled".to_string());
    }

    warnings
}

fn print_config(cfg: &EffectiveConfig, json: bool) -> i32 {
    if json {
        return match serde_json::to_string_pretty(cfg) {
            Ok(text) => {
                println!("{}", text);
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize configuration: {}", e);
                EXIT_FAILURE
            }
        };
    }

    println!("GAVID_DEVICE={}", cfg.device);
    println!("GAVID_MODEL_FP16={}", cfg.model_fp16);
    println!("GAVID_MAX_BATCH_SIZE={}", cfg.max_batch_size);
    println!("GAVID_ALLOW_CPU_FALLBACK={}", cfg.allow_cpu_fallback);
    println!("GAVID_METRICS_INTERVAL_S={}", cfg.metrics_interval_s);
    println!("GAVID_MODEL_ENGINE_PATH={}", cfg.engine_path);
    println!(
        "GAVID_MODEL_WEIGHTS={}",
        cfg.model_weights.as_deref().unwrap_or("")
    );
    println!("GAVID_MODEL_DIR={}", cfg.model_dir);
    println!("GAVID_MODEL_REPO={}", cfg.model_repo);
    println!("GAVID_DCGM_FIELD_IDS={}", cfg.dcgm_field_ids);
    println!("GAVID_DCGMI_PATH={}", cfg.dcgmi_path);
    println!("GAVID_GPU_INDEX={}", cfg.gpu_index);
    println!("GAVID_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("GAVID_LOG={}", cfg.log_level);
    println!("GAVID_LOG_FORMAT={}", cfg.log_format);
    EXIT_SUCCESS
}
