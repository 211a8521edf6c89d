//! Compiled artifact cache behavior.

mod common;

use candle_core::Device;

use gavid_core::engine::{
    ArtifactCache, CompileProfile, DeviceSpec, EngineKind, InferenceEngine, InferenceError, Precision,
};

use common::{cpu_config, gray_224, resnet, CountingCompiler};

fn profile(max_batch: usize) -> CompileProfile {
    CompileProfile::for_max_batch(DeviceSpec::cpu(), Precision::Fp32, max_batch)
}

#[test]
fn test_absent_artifact_compiles_once_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifacts").join("engine.safetensors");
    let compiler = CountingCompiler::new(resnet(10));

    let cache = ArtifactCache::new(&path);
    assert!(!cache.exists());
    let artifact = cache
        .load_or_compile(compiler.as_ref(), &profile(8), &Device::Cpu)
        .unwrap()
        .unwrap();

    assert_eq!(compiler.count(), 1);
    assert!(path.is_file());
    assert_eq!(artifact.digest().len(), 64);
    assert_eq!(artifact.profile().opt_batch, 5);
    assert_eq!(artifact.num_classes(), 10);
}

#[test]
fn test_existing_artifact_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.safetensors");
    let network = resnet(10);

    let first = CountingCompiler::new(network.clone());
    let built = ArtifactCache::new(&path)
        .load_or_compile(first.as_ref(), &profile(8), &Device::Cpu)
        .unwrap()
        .unwrap();

    let second = CountingCompiler::new(network);
    let reused = ArtifactCache::new(&path)
        .load_or_compile(second.as_ref(), &profile(8), &Device::Cpu)
        .unwrap()
        .unwrap();

    assert_eq!(second.count(), 0);
    assert_eq!(built.digest(), reused.digest());
}

#[test]
fn test_force_recompiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.safetensors");
    let compiler = CountingCompiler::new(resnet(10));

    ArtifactCache::new(&path)
        .load_or_compile(compiler.as_ref(), &profile(8), &Device::Cpu)
        .unwrap();
    ArtifactCache::new(&path)
        .with_force(true)
        .load_or_compile(compiler.as_ref(), &profile(4), &Device::Cpu)
        .unwrap();

    assert_eq!(compiler.count(), 2);
}

#[test]
fn test_mismatched_profile_keeps_stored_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.safetensors");
    let compiler = CountingCompiler::new(resnet(10));

    ArtifactCache::new(&path)
        .load_or_compile(compiler.as_ref(), &profile(8), &Device::Cpu)
        .unwrap();
    let reused = ArtifactCache::new(&path)
        .load_or_compile(compiler.as_ref(), &profile(2), &Device::Cpu)
        .unwrap()
        .unwrap();

    assert_eq!(compiler.count(), 1);
    assert_eq!(reused.profile().max_batch, 8);
}

#[test]
fn test_corrupt_artifact_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.safetensors");
    std::fs::write(&path, b"not a graph").unwrap();
    let compiler = CountingCompiler::new(resnet(10));

    let err = ArtifactCache::new(&path)
        .load_or_compile(compiler.as_ref(), &profile(8), &Device::Cpu)
        .unwrap_err();
    assert!(matches!(err, InferenceError::Artifact { .. }));
    assert!(err.is_fatal());
    assert_eq!(compiler.count(), 0);
}

#[test]
fn test_engine_runs_cached_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.safetensors");
    let network = resnet(10);
    let compiler = CountingCompiler::new(network.clone());

    let engine = InferenceEngine::builder(cpu_config())
        .network(network)
        .compiler(compiler.clone())
        .artifact_path(&path)
        .build()
        .unwrap();
    assert_eq!(engine.kind(), EngineKind::Compiled);

    let result = engine.predict(&gray_224()).unwrap();
    assert_eq!(result.engine_name, "compiled");
    assert_eq!(result.batch_size, 1);
}
