// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Inference engine module for GAVID Core.
//!
//! Handles image preprocessing, model loading, compiled artifact caching and
//! prediction. Provides the `ClassifierModel` and `GraphCompiler` seams.

pub mod artifact;
pub mod compiler;
pub mod config;
pub mod error;
pub mod gpu;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod preprocess;
pub mod resnet;
pub mod shared;
pub mod weights;

mod inference;

pub use artifact::{ArtifactCache, CompileProfile, CompiledArtifact};
pub use compiler::{FusedGraphCompiler, GraphCompiler, LoadedGraph};
pub use config::EngineConfig;
pub use error::InferenceError;
pub use gpu::{DeviceSpec, GpuBackend, Precision};
pub use inference::{ClassificationCandidate, EngineBuilder, EngineKind, ExecutionBackend};
pub use inference::{InferenceEngine, InferenceResult, PhaseTimings, TOP_K};
pub use model::{ClassifierModel, LabelSet};
pub use preprocess::{Preprocessor, INPUT_SIZE};
pub use resnet::{ResNet18, ResNetForm, WeightMap};
pub use shared::SharedSlot;
pub use weights::{ModelBundle, WeightFormat, WeightSource};

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;
