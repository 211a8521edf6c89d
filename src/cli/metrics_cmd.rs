// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Metrics CLI subcommand: sample GPU telemetry.

use std::sync::Arc;

use crate::telemetry::{SampleCount, TelemetryResponse};
use crate::{config, Runtime, RuntimeConfig};

use super::{exit_code_for, flag_number, EXIT_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

#[derive(Debug, PartialEq)]
struct MetricsArgs {
    samples: SampleCount,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<MetricsArgs, String> {
    let mut samples = SampleCount::default();
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--samples" | "-n" => {
                let n = flag_number::<usize>(args, i, "--samples")?;
                samples = SampleCount::new(n).map_err(|e| e.to_string())?;
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(MetricsArgs { samples, json })
}

/// Run `metrics`: collect samples from the probed backend and print them.
pub async fn run_metrics(args: &[String]) -> i32 {
    let parsed = match parse_args(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}", message);
            return EXIT_CONFIG;
        }
    };

    let runtime = Arc::new(Runtime::new(RuntimeConfig::from(config::load())));
    let code = match runtime.collect(parsed.samples).await {
        Ok(response) => print_response(&response, parsed.json),
        Err(e) => {
            eprintln!("Telemetry error: {}", e);
            exit_code_for(&e)
        }
    };

    if let Err(e) = runtime.shutdown().await {
        eprintln!("Shutdown error: {}", e);
    }
    code
}

fn print_response(response: &TelemetryResponse, json: bool) -> i32 {
    if json {
        return match serde_json::to_string_pretty(response) {
            Ok(text) => {
                println!("{}", text);
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize telemetry: {}", e);
                EXIT_FAILURE
            }
        };
    }

    println!(
        "source: {}  device: {}  interval: {}s",
        response.source,
        response.device.as_deref().unwrap_or("-"),
        response.interval_s
    );
    println!(
        "{:>8} {:>8} {:>12} {:>12} {:>9} {:>9} {:>7}",
        "GPU %", "MEM %", "USED (MB)", "TOTAL (MB)", "POWER W", "LIMIT W", "TEMP C"
    );
    println!("{}", "-".repeat(72));
    for s in &response.samples {
        println!(
            "{:>8.1} {:>8.1} {:>12.0} {:>12.0} {:>9.1} {:>9.1} {:>7.1}",
            s.gpu_util,
            s.mem_util,
            s.memory_used_mb,
            s.memory_total_mb,
            s.power_w,
            s.power_limit_w,
            s.temperature_c
        );
    }
    EXIT_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_to_one_sample() {
        let parsed = parse_args(&args(&["gavid-cli", "metrics"])).unwrap();
        assert_eq!(parsed.samples.get(), 1);
        assert!(!parsed.json);
    }

    #[test]
    fn test_sample_count_bounds() {
        assert!(parse_args(&args(&["gavid-cli", "metrics", "--samples", "0"])).is_err());
        assert!(parse_args(&args(&["gavid-cli", "metrics", "--samples", "121"])).is_err());
        let parsed = parse_args(&args(&["gavid-cli", "metrics", "-n", "120", "--json"])).unwrap();
        assert_eq!(parsed.samples.get(), 120);
        assert!(parsed.json);
    }
}
