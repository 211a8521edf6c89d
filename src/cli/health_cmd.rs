// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Health CLI subcommand.
//!
//! Builds the engine and probes telemetry in-process, then reports. Exit 0
//! when healthy or degraded, 1 when unhealthy.

use std::sync::Arc;

use crate::health::{HealthReport, HealthState};
use crate::{config, Runtime, RuntimeConfig};

use super::{EXIT_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

/// Run `health [--json]`.
pub async fn run_health(args: &[String]) -> i32 {
    let mut json = false;
    for arg in args.iter().skip(2) {
        match arg.as_str() {
            "--json" => json = true,
            other => {
                eprintln!("Unknown argument: {}", other);
                return EXIT_CONFIG;
            }
        }
    }

    let runtime = Arc::new(Runtime::new(RuntimeConfig::from(config::load())));
    let report = probe(&runtime).await;
    print_report(&report, json);
    exit_code(&report)
}

/// Force construction of both shared components, then snapshot health.
pub async fn probe(runtime: &Arc<Runtime>) -> HealthReport {
    let rt = Arc::clone(runtime);
    let built = tokio::task::spawn_blocking(move || {
        let _ = rt.telemetry();
        rt.engine().map(|_| ())
    })
    .await;

    match built {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("Engine unavailable: {}", e),
        Err(e) => eprintln!("Health probe task failed: {}", e),
    }
    runtime.health_report()
}

pub fn exit_code(report: &HealthReport) -> i32 {
    match report.state {
        HealthState::Healthy | HealthState::Degraded => EXIT_SUCCESS,
        HealthState::Unhealthy => EXIT_FAILURE,
    }
}

fn print_report(report: &HealthReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to serialize health report: {}", e),
        }
        return;
    }

    println!("State:      {:?}", report.state);
    println!("Ready:      {}", report.ready);
    match &report.engine {
        Some(engine) => println!(
            "Engine:     {} on {} ({} preprocessing, {})",
            engine.kind, engine.device, engine.preprocessor, engine.model
        ),
        None => println!("Engine:     not loaded"),
    }
    println!(
        "Telemetry:  {}",
        report.telemetry_source.as_deref().unwrap_or("not started")
    );
    println!("In flight:  {}", report.in_flight);
    println!("Uptime:     {}s", report.uptime_secs);
}
