//! Telemetry probing and collection.

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use gavid_core::telemetry::{
    BackendCandidate, SampleCount, TelemetryBackend, TelemetryCollector, TelemetryError,
};

use common::CountingBackend;

fn failing(name: &'static str) -> BackendCandidate {
    BackendCandidate::new(name, move || {
        Err(TelemetryError::BackendUnavailable {
            backend: name.to_string(),
            reason: "not installed".to_string(),
        })
    })
}

fn succeeding(name: &'static str) -> BackendCandidate {
    BackendCandidate::new(name, move || {
        Ok(Box::new(CountingBackend::new(name)) as Box<dyn TelemetryBackend>)
    })
}

#[test]
fn test_first_available_candidate_wins() {
    let collector = TelemetryCollector::with_candidates(
        vec![failing("dcgm"), succeeding("nvml"), succeeding("later")],
        Duration::ZERO,
    );
    assert_eq!(collector.source(), "nvml");
}

#[test]
fn test_all_candidates_failing_falls_back_to_stub() {
    let collector =
        TelemetryCollector::with_candidates(vec![failing("dcgm"), failing("nvml")], Duration::ZERO);
    assert_eq!(collector.source(), "stub");

    let response = collector.collect(2).unwrap();
    assert_eq!(response.source, "stub");
    assert_eq!(response.samples.len(), 2);
    for sample in &response.samples {
        assert!(sample.memory_used_mb <= sample.memory_total_mb);
        assert!(sample.timestamp > 0.0);
    }
}

#[test]
fn test_collect_sleeps_between_samples() {
    let backend = CountingBackend::new("counting");
    let calls = backend.samples.clone();
    let interval = Duration::from_millis(30);
    let collector = TelemetryCollector::from_backend(Box::new(backend), interval);

    let start = Instant::now();
    let response = collector.collect(3).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response.samples.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(elapsed >= interval * 2, "elapsed {:?}", elapsed);
    assert!((response.interval_s - 0.03).abs() < 1e-9);
}

#[test]
fn test_single_sample_does_not_sleep() {
    let backend = CountingBackend::new("counting");
    let calls = backend.samples.clone();
    let collector = TelemetryCollector::from_backend(Box::new(backend), Duration::from_secs(5));

    let start = Instant::now();
    collector.collect(1).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_releases_backend_once() {
    let backend = CountingBackend::new("counting");
    let closes = backend.closes.clone();
    let collector = TelemetryCollector::from_backend(Box::new(backend), Duration::ZERO);

    collector.close().unwrap();
    assert!(matches!(collector.close(), Err(TelemetryError::AlreadyClosed)));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(matches!(collector.collect(1), Err(TelemetryError::Closed)));
}

#[test]
fn test_sample_count_bounds() {
    assert!(SampleCount::new(0).is_err());
    assert!(SampleCount::new(121).is_err());
    assert_eq!(SampleCount::new(120).unwrap().get(), 120);
    assert_eq!(SampleCount::default().get(), 1);
}
