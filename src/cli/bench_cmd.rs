// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Bench CLI subcommand: CPU baseline against the configured device.

use std::time::Instant;

use serde::Serialize;

use crate::config;
use crate::engine::{EngineConfig, GpuBackend, InferenceEngine, InferenceError};

use super::{flag_number, inference_exit_code, random_image_png};
use super::{EXIT_CONFIG, EXIT_SUCCESS};

#[derive(Debug, Clone, Copy, PartialEq)]
struct BenchArgs {
    iters: usize,
    warmup: usize,
}

impl Default for BenchArgs {
    fn default() -> Self {
        Self { iters: 25, warmup: 5 }
    }
}

fn parse_args(args: &[String]) -> Result<BenchArgs, String> {
    let mut parsed = BenchArgs::default();
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--iters" => {
                parsed.iters = flag_number::<usize>(args, i, "--iters")?.max(1);
                i += 2;
            }
            "--warmup" => {
                parsed.warmup = flag_number::<usize>(args, i, "--warmup")?;
                i += 2;
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(parsed)
}

/// Mean wall-clock latency of one engine.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub device: String,
    pub engine: String,
    pub iters: usize,
    pub mean_latency_ms: f64,
}

/// Build an engine for `config` and time `iters` predictions after `warmup`
/// untimed ones.
pub fn run_benchmark(
    config: &EngineConfig,
    payload: &[u8],
    iters: usize,
    warmup: usize,
) -> Result<BenchReport, InferenceError> {
    let engine = InferenceEngine::from_config(config)?;
    for _ in 0..warmup {
        engine.predict(payload)?;
    }

    let iters = iters.max(1);
    let mut total_ms = 0.0;
    for _ in 0..iters {
        let start = Instant::now();
        engine.predict(payload)?;
        total_ms += start.elapsed().as_secs_f64() * 1000.0;
    }

    Ok(BenchReport {
        device: engine.device_spec().to_string(),
        engine: engine.kind().to_string(),
        iters,
        mean_latency_ms: total_ms / iters as f64,
    })
}

/// Run `bench`: CPU first, then the configured accelerator if there is one.
pub fn run_bench(args: &[String]) -> i32 {
    let parsed = match parse_args(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}", message);
            return EXIT_CONFIG;
        }
    };

    let config = config::load().engine;
    let payload = match random_image_png() {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{}", e);
            return inference_exit_code(&e);
        }
    };

    let cpu = match run_benchmark(&config.on_cpu(), &payload, parsed.iters, parsed.warmup) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("CPU benchmark failed: {}", e);
            return inference_exit_code(&e);
        }
    };
    println!("CPU mean latency: {:.2} ms", cpu.mean_latency_ms);

    let backend = config.device.backend;
    if backend == GpuBackend::Cpu || !backend.runtime_available() {
        println!("Skipping accelerator benchmark; {} is not available.", config.device);
        return EXIT_SUCCESS;
    }

    let device = match run_benchmark(&config, &payload, parsed.iters, parsed.warmup) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} benchmark failed: {}", config.device, e);
            return inference_exit_code(&e);
        }
    };
    println!(
        "{} ({}) mean latency: {:.2} ms",
        device.device, device.engine, device.mean_latency_ms
    );
    if device.mean_latency_ms > 0.0 {
        println!("Speedup vs CPU: {:.2}x", cpu.mean_latency_ms / device.mean_latency_ms);
    }
    EXIT_SUCCESS
}
