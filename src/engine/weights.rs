// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Weight discovery and loading.
//!
//! Lookup order: the pretrained bundle `<model_dir>/<repo>.safetensors` (with
//! `<repo>.labels.txt`), then an explicitly configured local weight file.
//! There is no random-initialization fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};

use super::error::InferenceError;
use super::model::{ClassifierModel, LabelSet};
use super::resnet::{ResNet18, WeightMap};

/// Class count of the ImageNet-1k head, used for generic labels.
pub const IMAGENET_CLASSES: usize = 1000;

/// Where the model weights come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// Pretrained bundle with an accompanying label file.
    Pretrained { weights: PathBuf, labels: PathBuf },
    /// User-supplied checkpoint; labels are generic.
    Local(PathBuf),
}

/// On-disk weight encodings understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Safetensors,
    Pickle,
    Onnx,
}

impl WeightFormat {
    pub fn from_path(path: &Path) -> Result<Self, InferenceError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "safetensors" => Ok(Self::Safetensors),
            "pth" | "pt" | "bin" => Ok(Self::Pickle),
            "onnx" => Ok(Self::Onnx),
            _ => Err(InferenceError::Configuration(format!(
                "unsupported weight file '{}'",
                path.display()
            ))),
        }
    }
}

/// Loaded model plus the metadata the engine needs around it.
pub struct ModelBundle {
    pub model: Arc<dyn ClassifierModel>,
    /// Set for ResNet weights; the fused compiler works from it.
    pub network: Option<Arc<ResNet18>>,
    pub labels: LabelSet,
    pub source: WeightSource,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("model", &self.model.name())
            .field("labels", &self.labels.len())
            .field("source", &self.source)
            .finish()
    }
}

impl WeightSource {
    /// Find weights, preferring the pretrained bundle.
    pub fn locate(model_dir: &Path, repo: &str, local: Option<&Path>) -> Result<Self, InferenceError> {
        let weights = model_dir.join(format!("{}.safetensors", repo));
        if weights.is_file() {
            let labels = model_dir.join(format!("{}.labels.txt", repo));
            return Ok(Self::Pretrained { weights, labels });
        }
        tracing::debug!(path = %weights.display(), "Pretrained bundle not found");

        match local {
            Some(path) if path.is_file() => Ok(Self::Local(path.to_path_buf())),
            Some(path) => Err(InferenceError::Configuration(format!(
                "weight file not found: {}",
                path.display()
            ))),
            None => Err(InferenceError::Configuration(format!(
                "no pretrained weights at {} and GAVID_MODEL_WEIGHTS is not set",
                weights.display()
            ))),
        }
    }

    pub fn weights_path(&self) -> &Path {
        match self {
            Self::Pretrained { weights, .. } => weights,
            Self::Local(path) => path,
        }
    }

    /// Load the eager model onto `device` at `dtype`.
    pub fn load(&self, device: &Device, dtype: DType) -> Result<ModelBundle, InferenceError> {
        let path = self.weights_path();
        let format = WeightFormat::from_path(path)?;
        tracing::info!(path = %path.display(), format = ?format, "Loading model weights");

        let (model, network): (Arc<dyn ClassifierModel>, Option<Arc<ResNet18>>) = match format {
            WeightFormat::Safetensors | WeightFormat::Pickle => {
                let weights = read_state_dict(path, format, device)?;
                let network = Arc::new(ResNet18::from_weights(&weights, dtype)?);
                (network.clone(), Some(network))
            }
            WeightFormat::Onnx => (load_onnx(path, device)?, None),
        };

        let labels = match self {
            Self::Pretrained { labels, .. } if labels.is_file() => LabelSet::from_file(labels)?,
            Self::Pretrained { labels, .. } => {
                tracing::warn!(path = %labels.display(), "Label file missing, using generic labels");
                LabelSet::generic(model.num_classes())
            }
            Self::Local(_) => LabelSet::generic(model.num_classes()),
        };

        Ok(ModelBundle {
            model,
            network,
            labels,
            source: self.clone(),
        })
    }
}

/// Read a checkpoint into named tensors on `device`.
pub fn read_state_dict(path: &Path, format: WeightFormat, device: &Device) -> Result<WeightMap, InferenceError> {
    match format {
        WeightFormat::Safetensors => Ok(candle_core::safetensors::load(path, device)?),
        WeightFormat::Pickle => {
            let entries = candle_core::pickle::read_all(path)?;
            let mut weights = WeightMap::with_capacity(entries.len());
            for (name, tensor) in entries {
                // DataParallel checkpoints prefix every key.
                let name = name.strip_prefix("module.").map(str::to_string).unwrap_or(name);
                weights.insert(name, tensor.to_device(device)?);
            }
            Ok(weights)
        }
        WeightFormat::Onnx => Err(InferenceError::Configuration(
            "onnx files carry a graph, not a state dict".into(),
        )),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, device: &Device) -> Result<Arc<dyn ClassifierModel>, InferenceError> {
    Ok(Arc::new(super::onnx::OnnxClassifier::load(path, device)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path, _device: &Device) -> Result<Arc<dyn ClassifierModel>, InferenceError> {
    Err(InferenceError::Configuration(format!(
        "{} requires the 'onnx' feature",
        path.display()
    )))
}

/// Persist a state dict as safetensors (CPU copy).
pub fn write_state_dict(weights: &WeightMap, path: &Path) -> Result<(), InferenceError> {
    let cpu: std::collections::HashMap<String, Tensor> = weights
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.to_device(&Device::Cpu)?)))
        .collect::<Result<_, InferenceError>>()?;
    candle_core::safetensors::save(&cpu, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(WeightFormat::from_path(Path::new("a.safetensors")).unwrap(), WeightFormat::Safetensors);
        assert_eq!(WeightFormat::from_path(Path::new("a.PTH")).unwrap(), WeightFormat::Pickle);
        assert_eq!(WeightFormat::from_path(Path::new("a.onnx")).unwrap(), WeightFormat::Onnx);
        assert!(WeightFormat::from_path(Path::new("a.gguf")).is_err());
    }

    #[test]
    fn test_locate_without_any_weights_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WeightSource::locate(dir.path(), "resnet18", None).unwrap_err();
        assert!(matches!(err, InferenceError::Configuration(_)));
    }

    #[test]
    fn test_locate_missing_local_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pth");
        let err = WeightSource::locate(dir.path(), "resnet18", Some(&missing)).unwrap_err();
        assert!(matches!(err, InferenceError::Configuration(_)));
    }

    #[test]
    fn test_locate_prefers_pretrained_bundle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("resnet18.safetensors"), b"x").unwrap();
        let local = dir.path().join("local.pth");
        std::fs::write(&local, b"x").unwrap();

        let source = WeightSource::locate(dir.path(), "resnet18", Some(&local)).unwrap();
        assert!(matches!(source, WeightSource::Pretrained { .. }));
        assert!(source.weights_path().ends_with("resnet18.safetensors"));
    }

    #[test]
    fn test_locate_falls_back_to_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.safetensors");
        std::fs::write(&local, b"x").unwrap();

        let source = WeightSource::locate(dir.path(), "resnet18", Some(&local)).unwrap();
        assert_eq!(source, WeightSource::Local(local));
    }

    #[test]
    fn test_load_local_safetensors_uses_generic_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.safetensors");
        write_state_dict(&crate::engine::resnet::tests::random_weights(7), &path).unwrap();

        let bundle = WeightSource::Local(path).load(&Device::Cpu, DType::F32).unwrap();
        assert_eq!(bundle.model.num_classes(), 7);
        assert_eq!(bundle.labels.name(3), "class_3");
        assert!(bundle.network.is_some());
    }

    #[test]
    fn test_load_pretrained_reads_labels() {
        let dir = tempfile::tempdir().unwrap();
        write_state_dict(
            &crate::engine::resnet::tests::random_weights(2),
            &dir.path().join("resnet18.safetensors"),
        )
        .unwrap();
        std::fs::write(dir.path().join("resnet18.labels.txt"), "cat\ndog\n").unwrap();

        let source = WeightSource::locate(dir.path(), "resnet18", None).unwrap();
        let bundle = source.load(&Device::Cpu, DType::F32).unwrap();
        assert_eq!(bundle.labels.name(1), "dog");
    }
}
