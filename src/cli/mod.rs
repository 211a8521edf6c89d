// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! CLI module for GAVID runtime commands.
//!
//! Each command builds what it needs in-process from `GAVID_*` environment
//! configuration and returns a process exit code.
//!
//! ## Usage
//!
//! ```bash
//! gavid-cli infer cat.jpg         # Classify images
//! gavid-cli metrics --samples 5   # Sample GPU telemetry
//! gavid-cli compile --force       # Rebuild the compiled artifact
//! gavid-cli bench --iters 50      # CPU vs accelerator latency
//! gavid-cli health                # Exit 0 if healthy or degraded
//! ```

pub mod bench_cmd;
pub mod compile_cmd;
pub mod config_cmd;
pub mod health_cmd;
pub mod infer_cmd;
pub mod metrics_cmd;

use std::io::Cursor;

use image::{ImageFormat, RgbImage};
use rand::Rng;

use crate::engine::{InferenceError, INPUT_SIZE};
use crate::RuntimeError;

/// Command completed.
pub const EXIT_SUCCESS: i32 = 0;
/// Command failed at runtime.
pub const EXIT_FAILURE: i32 = 1;
/// Configuration or usage prevented the command from running.
pub const EXIT_CONFIG: i32 = 2;

/// Exit code for an error surfaced through the runtime.
pub fn exit_code_for(err: &RuntimeError) -> i32 {
    match err {
        RuntimeError::Inference(e) => inference_exit_code(e),
        _ => EXIT_FAILURE,
    }
}

/// Construction failures are configuration errors; everything else is a
/// runtime failure.
pub fn inference_exit_code(err: &InferenceError) -> i32 {
    if err.is_fatal() {
        EXIT_CONFIG
    } else {
        EXIT_FAILURE
    }
}

/// Value following `flag` at `args[i]`, or a usage message.
pub(crate) fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", flag))
}

/// Parse the value following `flag` as a number.
pub(crate) fn flag_number<T: std::str::FromStr>(
    args: &[String],
    i: usize,
    flag: &str,
) -> Result<T, String> {
    let raw = flag_value(args, i, flag)?;
    raw.parse::<T>()
        .map_err(|_| format!("Invalid value for {}: {}", flag, raw))
}

/// PNG-encoded noise at the classifier's input size, for warm-up and
/// benchmark payloads.
pub fn random_image_png() -> Result<Vec<u8>, InferenceError> {
    let mut rng = rand::thread_rng();
    let image = RgbImage::from_fn(INPUT_SIZE, INPUT_SIZE, |_, _| {
        image::Rgb([rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>()])
    });
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| InferenceError::InvalidImage(format!("encode warm-up image: {}", e)))?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::preprocess::decode_image;
    use crate::telemetry::TelemetryError;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flag_value() {
        let a = args(&["gavid-cli", "metrics", "--samples", "4"]);
        assert_eq!(flag_value(&a, 2, "--samples").unwrap(), "4");
        assert_eq!(flag_number::<usize>(&a, 2, "--samples").unwrap(), 4);
        assert!(flag_value(&a, 3, "--samples").is_err());
    }

    #[test]
    fn test_flag_number_rejects_garbage() {
        let a = args(&["gavid-cli", "bench", "--iters", "many"]);
        let err = flag_number::<usize>(&a, 2, "--iters").unwrap_err();
        assert!(err.contains("many"));
    }

    #[test]
    fn test_exit_codes() {
        let config = RuntimeError::Inference(InferenceError::Configuration("x".into()));
        assert_eq!(exit_code_for(&config), EXIT_CONFIG);
        let invalid = RuntimeError::Inference(InferenceError::InvalidImage("x".into()));
        assert_eq!(exit_code_for(&invalid), EXIT_FAILURE);
        let closed = RuntimeError::Telemetry(TelemetryError::Closed);
        assert_eq!(exit_code_for(&closed), EXIT_FAILURE);
    }

    #[test]
    fn test_random_image_decodes() {
        let png = random_image_png().unwrap();
        let image = decode_image(&png).unwrap();
        assert_eq!(image.width(), INPUT_SIZE);
        assert_eq!(image.height(), INPUT_SIZE);
    }
}
