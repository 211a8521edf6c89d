// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Compile CLI subcommand: build the artifact ahead of serving.

use std::path::PathBuf;

use crate::config;
use crate::engine::{EngineConfig, InferenceEngine};

use super::{flag_number, flag_value, inference_exit_code, random_image_png};
use super::{EXIT_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

/// Apply `compile` flags on top of the environment configuration.
fn apply_args(mut config: EngineConfig, args: &[String]) -> Result<EngineConfig, String> {
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--engine-path" => {
                config.engine_path = config::absolutize(PathBuf::from(flag_value(args, i, "--engine-path")?));
                i += 2;
            }
            "--max-batch" => {
                let max = flag_number::<usize>(args, i, "--max-batch")?;
                if max == 0 {
                    return Err("--max-batch must be >= 1".to_string());
                }
                config.max_batch_size = max;
                i += 2;
            }
            "--fp16" => {
                config.model_fp16 = true;
                i += 1;
            }
            "--fp32" => {
                config.model_fp16 = false;
                i += 1;
            }
            "--force" => {
                config.force_compile = true;
                i += 1;
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(config)
}

/// Run `compile`: load or build the artifact, then one warm-up prediction.
pub fn run_compile(args: &[String]) -> i32 {
    let config = match apply_args(config::load().engine, args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{}", message);
            return EXIT_CONFIG;
        }
    };

    let engine = match InferenceEngine::from_config(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Engine construction failed: {}", e);
            return inference_exit_code(&e);
        }
    };

    match engine.artifact() {
        Some(artifact) => {
            let profile = artifact.profile();
            println!("Artifact: {}", artifact.path().display());
            println!("  sha256:    {}", artifact.digest());
            println!("  device:    {}", profile.device);
            println!("  precision: {}", profile.precision);
            println!(
                "  batch:     min {} / opt {} / max {}",
                profile.min_batch, profile.opt_batch, profile.max_batch
            );
        }
        None => {
            println!(
                "No compiled artifact for {}; the engine runs the eager model.",
                engine.device_spec()
            );
        }
    }

    let warmup = match random_image_png() {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_FAILURE;
        }
    };
    match engine.predict(&warmup) {
        Ok(result) => {
            println!(
                "Warm-up: {:.2} ms ({} engine, preprocess {:.2} ms, exec {:.2} ms)",
                result.latency_ms,
                result.engine_name,
                result.timings.preprocess_ms,
                result.timings.exec_ms
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Warm-up prediction failed: {}", e);
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_override_config() {
        let config = apply_args(
            EngineConfig::default(),
            &args(&[
                "gavid-cli", "compile", "--engine-path", "/tmp/e.safetensors", "--max-batch", "16",
                "--fp32", "--force",
            ]),
        )
        .unwrap();
        assert_eq!(config.engine_path, PathBuf::from("/tmp/e.safetensors"));
        assert_eq!(config.max_batch_size, 16);
        assert!(!config.model_fp16);
        assert!(config.force_compile);
    }

    #[test]
    fn test_zero_batch_rejected() {
        assert!(apply_args(EngineConfig::default(), &args(&["gavid-cli", "compile", "--max-batch", "0"])).is_err());
    }

    #[test]
    fn test_missing_value_rejected() {
        let err = apply_args(EngineConfig::default(), &args(&["gavid-cli", "compile", "--engine-path"]))
            .unwrap_err();
        assert!(err.contains("--engine-path"));
    }
}
