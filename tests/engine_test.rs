//! End-to-end tests for the inference engine on the CPU.

mod common;

use candle_core::Device;

use gavid_core::engine::weights::write_state_dict;
use gavid_core::engine::{EngineKind, InferenceEngine, InferenceError, TOP_K};

use common::{cpu_config, gray_224, png, random_weights, resnet};

#[test]
fn test_gray_image_classifies() {
    let engine = InferenceEngine::builder(cpu_config())
        .device(Device::Cpu)
        .network(resnet(1000))
        .build()
        .unwrap();

    let result = engine.predict(&gray_224()).unwrap();
    assert_eq!(result.batch_size, 1);
    assert!(result.top1.confidence >= 0.0 && result.top1.confidence <= 1.0);
    assert_eq!(result.top5.len(), TOP_K);
    assert_eq!(result.top1, result.top5[0]);
    for pair in result.top5.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
    assert_eq!(result.backend, EngineKind::Eager);
}

#[test]
fn test_same_image_same_label() {
    let engine = InferenceEngine::builder(cpu_config())
        .network(resnet(20))
        .build()
        .unwrap();

    let image = png(300, 200, [200, 40, 90]);
    let first = engine.predict(&image).unwrap();
    let second = engine.predict(&image).unwrap();
    assert_eq!(first.top1.label, second.top1.label);
}

#[test]
fn test_timing_invariants() {
    let engine = InferenceEngine::builder(cpu_config())
        .network(resnet(10))
        .build()
        .unwrap();

    let result = engine.predict(&gray_224()).unwrap();
    let sum = result.timings.preprocess_ms + result.timings.exec_ms;
    assert!((result.latency_ms - sum).abs() < 1e-9);
    assert!(result.latency_ms > 0.0);
    assert!((result.throughput_fps * result.latency_ms - 1000.0).abs() < 1e-6);
}

#[test]
fn test_garbage_payload_is_invalid_image() {
    let engine = InferenceEngine::builder(cpu_config())
        .network(resnet(10))
        .build()
        .unwrap();

    let err = engine.predict(b"definitely not an image").unwrap_err();
    assert!(matches!(err, InferenceError::InvalidImage(_)));
    let err = engine.predict(&[]).unwrap_err();
    assert!(matches!(err, InferenceError::InvalidImage(_)));
}

#[test]
fn test_engine_from_local_weight_file() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("resnet18-custom.safetensors");
    write_state_dict(&random_weights(7), &weights).unwrap();

    let config = gavid_core::engine::EngineConfig {
        model_weights: Some(weights),
        model_dir: dir.path().join("absent"),
        ..cpu_config()
    };
    let engine = InferenceEngine::from_config(&config).unwrap();
    assert_eq!(engine.labels().len(), 7);
    assert_eq!(engine.kind(), EngineKind::Eager);

    let result = engine.predict(&gray_224()).unwrap();
    assert_eq!(result.top5.len(), 5);
}

#[test]
fn test_pretrained_bundle_labels() {
    let dir = tempfile::tempdir().unwrap();
    write_state_dict(&random_weights(5), &dir.path().join("resnet18.safetensors")).unwrap();
    std::fs::write(
        dir.path().join("resnet18.labels.txt"),
        "tabby\nbeagle\nhen\ngoldfish\nvolcano\n",
    )
    .unwrap();

    let config = gavid_core::engine::EngineConfig {
        model_dir: dir.path().to_path_buf(),
        ..cpu_config()
    };
    let engine = InferenceEngine::from_config(&config).unwrap();
    let result = engine.predict(&gray_224()).unwrap();

    let mut labels: Vec<String> = result.top5.iter().map(|c| c.label.clone()).collect();
    labels.sort();
    assert_eq!(labels, vec!["beagle", "goldfish", "hen", "tabby", "volcano"]);
}

#[test]
fn test_small_classifier_head_is_rejected() {
    let err = InferenceEngine::builder(cpu_config())
        .network(resnet(3))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, InferenceError::Configuration(_)));

    let dir = tempfile::tempdir().unwrap();
    write_state_dict(&random_weights(2), &dir.path().join("resnet18.safetensors")).unwrap();
    let config = gavid_core::engine::EngineConfig {
        model_dir: dir.path().to_path_buf(),
        ..cpu_config()
    };
    assert!(matches!(
        InferenceEngine::from_config(&config),
        Err(InferenceError::Configuration(_))
    ));
}
