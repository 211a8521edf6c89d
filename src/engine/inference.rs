// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Core inference execution.
//!
//! An `InferenceEngine` is built once, then serves any number of concurrent
//! `predict` calls through `&self`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use candle_core::{DType, Device, Tensor, D};
use serde::{Deserialize, Serialize};

use super::artifact::{ArtifactCache, CompileProfile, CompiledArtifact};
use super::compiler::{FusedGraphCompiler, GraphCompiler};
use super::config::EngineConfig;
use super::error::InferenceError;
use super::gpu::{resolve_device, synchronize, DeviceSpec, GpuBackend, Precision};
use super::model::{ClassifierModel, LabelSet};
use super::preprocess::{decode_image, Preprocessor};
use super::resnet::ResNet18;
use super::weights::WeightSource;

/// Number of ranked candidates in a result.
pub const TOP_K: usize = 5;

/// Which execution path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Compiled,
    Eager,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compiled => "compiled",
            Self::Eager => "eager",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled artifact when one could be produced, eager model otherwise.
pub enum ExecutionBackend {
    Compiled(CompiledArtifact),
    Eager(Arc<dyn ClassifierModel>),
}

impl ExecutionBackend {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Compiled(_) => EngineKind::Compiled,
            Self::Eager(_) => EngineKind::Eager,
        }
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, InferenceError> {
        match self {
            Self::Compiled(artifact) => artifact.forward(input),
            Self::Eager(model) => model.forward(input),
        }
    }
}

/// One ranked label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationCandidate {
    pub label: String,
    pub confidence: f32,
}

/// Wall-clock time per phase, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub preprocess_ms: f64,
    pub exec_ms: f64,
}

/// Outcome of a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub top1: ClassificationCandidate,
    pub top5: Vec<ClassificationCandidate>,
    pub latency_ms: f64,
    /// `1000 / latency_ms`; infinite when latency rounds to zero.
    pub throughput_fps: f64,
    pub engine_name: String,
    pub batch_size: usize,
    pub timings: PhaseTimings,
    pub backend: EngineKind,
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Image classifier bound to one device and one execution backend.
pub struct InferenceEngine {
    device: Device,
    precision: Precision,
    preprocessor: Preprocessor,
    backend: ExecutionBackend,
    labels: LabelSet,
    model_name: String,
}

impl fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("device", &DeviceSpec::of(&self.device).to_string())
            .field("precision", &self.precision)
            .field("preprocessor", &self.preprocessor.name())
            .field("backend", &self.backend.kind())
            .field("model", &self.model_name)
            .finish()
    }
}

impl InferenceEngine {
    /// Build an engine from configuration alone.
    pub fn from_config(config: &EngineConfig) -> Result<Self, InferenceError> {
        EngineBuilder::new(config.clone()).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_spec(&self) -> DeviceSpec {
        DeviceSpec::of(&self.device)
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn kind(&self) -> EngineKind {
        self.backend.kind()
    }

    pub fn preprocessor_name(&self) -> &'static str {
        self.preprocessor.name()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// The cached artifact, when running compiled.
    pub fn artifact(&self) -> Option<&CompiledArtifact> {
        match &self.backend {
            ExecutionBackend::Compiled(artifact) => Some(artifact),
            ExecutionBackend::Eager(_) => None,
        }
    }

    /// Classify one encoded image.
    pub fn predict(&self, image_bytes: &[u8]) -> Result<InferenceResult, InferenceError> {
        let image = decode_image(image_bytes)?;

        let start = Instant::now();
        let tensor = self.preprocessor.transform(&image)?;
        if self.preprocessor.runs_on_accelerator() {
            synchronize(&self.device)?;
        }
        let preprocess_ms = millis(start.elapsed());

        let batch = if tensor.rank() == 3 {
            tensor.unsqueeze(0)?
        } else {
            tensor
        };
        let batch = batch
            .to_device(&self.device)?
            .to_dtype(self.precision.dtype())?;
        let batch_size = batch.dim(0)?;

        let start = Instant::now();
        let logits = self.backend.forward(&batch)?;
        synchronize(&self.device)?;
        let exec_ms = millis(start.elapsed());

        let top5 = self.rank(&logits)?;
        let top1 = top5
            .first()
            .cloned()
            .ok_or_else(|| InferenceError::ExecutionFailure("model produced no logits".into()))?;

        let latency_ms = preprocess_ms + exec_ms;
        let throughput_fps = if latency_ms > 0.0 {
            1000.0 / latency_ms
        } else {
            f64::INFINITY
        };

        let backend = self.backend.kind();
        tracing::debug!(
            engine = %backend,
            label = %top1.label,
            confidence = top1.confidence,
            preprocess_ms,
            exec_ms,
            "Prediction complete"
        );

        Ok(InferenceResult {
            top1,
            top5,
            latency_ms,
            throughput_fps,
            engine_name: backend.to_string(),
            batch_size,
            timings: PhaseTimings {
                preprocess_ms,
                exec_ms,
            },
            backend,
        })
    }

    /// Softmax over the first batch row, best `TOP_K` first.
    fn rank(&self, logits: &Tensor) -> Result<Vec<ClassificationCandidate>, InferenceError> {
        let row = logits.get(0)?.to_dtype(DType::F32)?;
        let probs: Vec<f32> = candle_nn::ops::softmax(&row, D::Minus1)?.to_vec1()?;

        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

        Ok(order
            .into_iter()
            .take(TOP_K)
            .map(|idx| ClassificationCandidate {
                label: self.labels.name(idx),
                confidence: probs[idx],
            })
            .collect())
    }
}

/// Every result carries a full top-`TOP_K` list, so smaller heads are refused.
fn ensure_ranked_classes(num_classes: usize) -> Result<(), InferenceError> {
    if num_classes < TOP_K {
        return Err(InferenceError::Configuration(format!(
            "model has {} classes, at least {} are required",
            num_classes, TOP_K
        )));
    }
    Ok(())
}

/// Step-by-step engine construction with injectable parts.
pub struct EngineBuilder {
    config: EngineConfig,
    device: Option<Device>,
    model: Option<Arc<dyn ClassifierModel>>,
    network: Option<Arc<ResNet18>>,
    labels: Option<LabelSet>,
    compiler: Option<Arc<dyn GraphCompiler>>,
    artifact_path: Option<PathBuf>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            device: None,
            model: None,
            network: None,
            labels: None,
            compiler: None,
            artifact_path: None,
        }
    }

    /// Use this device instead of resolving `config.device`.
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Use this model instead of loading weights.
    pub fn model(mut self, model: Arc<dyn ClassifierModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Use this ResNet, which also feeds the default compiler.
    pub fn network(mut self, network: Arc<ResNet18>) -> Self {
        self.model = Some(network.clone());
        self.network = Some(network);
        self
    }

    pub fn labels(mut self, labels: LabelSet) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Consult the artifact cache with this compiler on any device.
    pub fn compiler(mut self, compiler: Arc<dyn GraphCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<InferenceEngine, InferenceError> {
        let config = self.config;
        config.validate()?;

        let device = match self.device {
            Some(device) => device,
            None => resolve_device(config.device, config.allow_cpu_fallback)?,
        };
        let precision = Precision::for_device(config.model_fp16, &device);

        let (model, network, labels) = match self.model {
            Some(model) => {
                let labels = self
                    .labels
                    .unwrap_or_else(|| LabelSet::generic(model.num_classes()));
                (model, self.network, labels)
            }
            None => {
                let source = WeightSource::locate(
                    &config.model_dir,
                    &config.model_repo,
                    config.model_weights.as_deref(),
                )?;
                let bundle = source.load(&device, precision.dtype())?;
                let labels = self.labels.unwrap_or(bundle.labels);
                (bundle.model, bundle.network, labels)
            }
        };

        ensure_ranked_classes(model.num_classes())?;
        let preprocessor = Preprocessor::select(&device)?;

        let injected = self.compiler.is_some();
        let compiler = self.compiler.or_else(|| {
            network
                .clone()
                .map(|n| Arc::new(FusedGraphCompiler::new(n)) as Arc<dyn GraphCompiler>)
        });

        let backend = match compiler {
            Some(compiler) if injected || GpuBackend::of(&device).is_accelerator() => {
                let cache = ArtifactCache::new(
                    self.artifact_path
                        .unwrap_or_else(|| config.engine_path.clone()),
                )
                .with_force(config.force_compile);
                let profile = CompileProfile::for_max_batch(
                    DeviceSpec::of(&device),
                    precision,
                    config.max_batch_size,
                );
                match cache.load_or_compile(compiler.as_ref(), &profile, &device)? {
                    Some(artifact) => ExecutionBackend::Compiled(artifact),
                    None => ExecutionBackend::Eager(model.clone()),
                }
            }
            _ => ExecutionBackend::Eager(model.clone()),
        };
        if let ExecutionBackend::Compiled(artifact) = &backend {
            ensure_ranked_classes(artifact.num_classes())?;
        }

        let engine = InferenceEngine {
            model_name: model.name().to_string(),
            device,
            precision,
            preprocessor,
            backend,
            labels,
        };
        tracing::info!(
            device = %engine.device_spec(),
            precision = %engine.precision,
            preprocessor = engine.preprocessor.name(),
            backend = %engine.kind(),
            model = %engine.model_name,
            classes = engine.labels.len(),
            "Inference engine ready"
        );
        Ok(engine)
    }
}

#[cfg(test)]
#[path = "inference_tests.rs"]
mod tests;
