//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};

use gavid_core::engine::resnet::parameter_shapes;
use gavid_core::engine::{
    CompileProfile, DeviceSpec, EngineConfig, FusedGraphCompiler, GraphCompiler, InferenceError,
    LoadedGraph, ResNet18, WeightMap,
};
use gavid_core::telemetry::{MetricSample, StubBackend, TelemetryBackend, TelemetryError};

/// Random weights with torchvision ResNet-18 shapes.
pub fn random_weights(num_classes: usize) -> WeightMap {
    parameter_shapes(num_classes)
        .into_iter()
        .map(|(name, shape)| {
            let positive = name.ends_with("running_var")
                || (name.ends_with("weight") && (name.contains("bn") || name.contains("downsample.1")));
            let tensor = if positive {
                Tensor::rand(0.5f32, 1.5, shape, &Device::Cpu)
            } else {
                Tensor::randn(0f32, 0.05, shape, &Device::Cpu)
            };
            (name, tensor.unwrap())
        })
        .collect()
}

pub fn resnet(num_classes: usize) -> Arc<ResNet18> {
    Arc::new(ResNet18::from_weights(&random_weights(num_classes), candle_core::DType::F32).unwrap())
}

pub fn cpu_config() -> EngineConfig {
    EngineConfig {
        device: DeviceSpec::cpu(),
        model_fp16: false,
        ..Default::default()
    }
}

/// Solid-color PNG.
pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let buffer: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(buffer)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn gray_224() -> Vec<u8> {
    png(224, 224, [128, 128, 128])
}

/// Fused compiler that also targets the CPU and counts compilations.
pub struct CountingCompiler {
    inner: FusedGraphCompiler,
    pub compiles: AtomicUsize,
}

impl CountingCompiler {
    pub fn new(network: Arc<ResNet18>) -> Arc<Self> {
        Arc::new(Self {
            inner: FusedGraphCompiler::new(network),
            compiles: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl GraphCompiler for CountingCompiler {
    fn name(&self) -> &str {
        "counting"
    }

    fn check_available(&self, _device: &Device) -> Result<(), InferenceError> {
        Ok(())
    }

    fn compile(&self, profile: &CompileProfile) -> Result<Vec<u8>, InferenceError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(profile)
    }

    fn load(&self, bytes: &[u8], device: &Device) -> Result<LoadedGraph, InferenceError> {
        self.inner.load(bytes, device)
    }
}

/// Stub readings under a custom source name, with call counters.
pub struct CountingBackend {
    name: &'static str,
    pub samples: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            samples: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl TelemetryBackend for CountingBackend {
    fn sample(&mut self) -> Result<MetricSample, TelemetryError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok(StubBackend::sample_at(1_700_000_000.0))
    }

    fn close(&mut self) -> Result<(), TelemetryError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn source_name(&self) -> &str {
        self.name
    }
}
