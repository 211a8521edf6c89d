// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Metrics facade.
//!
//! Emits through the `metrics` crate; without an installed recorder every
//! call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

pub const INFERENCE_REQUESTS: &str = "gavid_inference_requests_total";
pub const INFERENCE_LATENCY: &str = "gavid_inference_latency_ms";
pub const TELEMETRY_SAMPLES: &str = "gavid_telemetry_samples_total";
pub const IN_FLIGHT_REQUESTS: &str = "gavid_in_flight_requests";

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(INFERENCE_REQUESTS, "Predictions by engine and outcome");
    describe_histogram!(INFERENCE_LATENCY, Unit::Milliseconds, "End-to-end prediction latency");
    describe_counter!(TELEMETRY_SAMPLES, "GPU telemetry samples taken");
    describe_gauge!(IN_FLIGHT_REQUESTS, "Requests currently executing");
}

pub fn record_inference_success(engine: &str, latency_ms: f64) {
    counter!(INFERENCE_REQUESTS, "engine" => engine.to_string(), "status" => "ok").increment(1);
    histogram!(INFERENCE_LATENCY, "engine" => engine.to_string()).record(latency_ms);
}

/// `kind` is a short error class such as `invalid_image`.
pub fn record_inference_failure(engine: &str, kind: &'static str) {
    counter!(INFERENCE_REQUESTS, "engine" => engine.to_string(), "status" => kind).increment(1);
}

pub fn record_telemetry_samples(source: &str, count: usize) {
    counter!(TELEMETRY_SAMPLES, "source" => source.to_string()).increment(count as u64);
}

pub fn record_in_flight(count: usize) {
    gauge!(IN_FLIGHT_REQUESTS).set(count as f64);
}
