// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! ONNX-based image classification model.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_onnx::onnx::{tensor_shape_proto, type_proto, ModelProto, ValueInfoProto};

use crate::engine::error::InferenceError;
use crate::engine::model::ClassifierModel;
use crate::engine::weights::IMAGENET_CLASSES;

/// ONNX classification graph evaluated by `candle_onnx::simple_eval`.
pub struct OnnxClassifier {
    name: String,
    model: ModelProto,
    input_name: String,
    output_name: String,
    num_classes: usize,
    device: Device,
}

impl OnnxClassifier {
    /// Read a graph with one image input and one logits output.
    pub fn load(path: &Path, device: &Device) -> Result<Self, InferenceError> {
        let model = candle_onnx::read_file(path)?;
        let graph = model.graph.as_ref().ok_or_else(|| {
            InferenceError::Configuration(format!("{} has no graph", path.display()))
        })?;

        let input_name = graph
            .input
            .first()
            .map(|v| v.name.clone())
            .ok_or_else(|| InferenceError::Configuration("onnx graph has no inputs".into()))?;
        let output = graph
            .output
            .first()
            .ok_or_else(|| InferenceError::Configuration("onnx graph has no outputs".into()))?;
        let num_classes = last_static_dim(output).unwrap_or(IMAGENET_CLASSES);

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
            .to_string();

        tracing::info!(model = %name, input = %input_name, output = %output.name, num_classes, "Loaded ONNX graph");

        Ok(Self {
            name,
            input_name,
            output_name: output.name.clone(),
            model,
            num_classes,
            device: device.clone(),
        })
    }
}

fn last_static_dim(value: &ValueInfoProto) -> Option<usize> {
    let tensor = match value.r#type.as_ref()?.value.as_ref()? {
        type_proto::Value::TensorType(t) => t,
        _ => return None,
    };
    match tensor.shape.as_ref()?.dim.last()?.value.as_ref()? {
        tensor_shape_proto::dimension::Value::DimValue(v) if *v > 0 => Some(*v as usize),
        _ => None,
    }
}

impl ClassifierModel for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, InferenceError> {
        // Graph initializers live on the host; evaluate there in f32.
        let host = input.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
        let inputs = HashMap::from([(self.input_name.clone(), host)]);
        let mut outputs = candle_onnx::simple_eval(&self.model, inputs)?;
        let logits = outputs.remove(&self.output_name).ok_or_else(|| {
            InferenceError::ExecutionFailure(format!("onnx output '{}' missing", self.output_name))
        })?;
        Ok(logits.to_device(&self.device)?)
    }
}
