// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! ResNet-18 image classifier evaluated with Candle tensors.
//!
//! Weights use the torchvision state-dict naming (`conv1`, `bn1`,
//! `layer{1..4}.{0,1}.*`, `fc`). A network loads in one of two forms:
//!
//! - **eager**: every convolution followed by an inference-mode batch norm;
//! - **fused**: batch norm folded into a convolution bias, which is what the
//!   compiled artifact stores.

use std::collections::HashMap;

use candle_core::{DType, Tensor, D};

use super::error::InferenceError;
use super::model::ClassifierModel;

/// Named tensors as found in a checkpoint or artifact.
pub type WeightMap = HashMap<String, Tensor>;

const BN_EPS: f64 = 1e-5;

/// (output channels, stride of the first block) per stage.
const STAGES: [(usize, usize); 4] = [(64, 1), (128, 2), (256, 2), (512, 2)];
const BLOCKS_PER_STAGE: usize = 2;

/// Which representation a network was loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResNetForm {
    Eager,
    Fused,
}

fn take(weights: &WeightMap, name: &str) -> Result<Tensor, InferenceError> {
    weights
        .get(name)
        .cloned()
        .ok_or_else(|| InferenceError::Configuration(format!("missing tensor '{}'", name)))
}

/// Inference-mode batch normalization.
struct BatchNorm {
    weight: Tensor,
    bias: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
}

impl BatchNorm {
    fn load(weights: &WeightMap, prefix: &str, dtype: DType) -> Result<Self, InferenceError> {
        let get = |suffix: &str| -> Result<Tensor, InferenceError> {
            Ok(take(weights, &format!("{}.{}", prefix, suffix))?.to_dtype(dtype)?)
        };
        Ok(Self {
            weight: get("weight")?,
            bias: get("bias")?,
            running_mean: get("running_mean")?,
            running_var: get("running_var")?,
        })
    }

    /// Per-channel `gamma / sqrt(var + eps)`.
    fn scale(&self) -> Result<Tensor, InferenceError> {
        let std = self.running_var.affine(1.0, BN_EPS)?.sqrt()?;
        Ok(self.weight.div(&std)?)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor, InferenceError> {
        let channels = self.weight.dims1()?;
        let shape = (1, channels, 1, 1);
        let scale = self.scale()?.reshape(shape)?;
        let out = x
            .broadcast_sub(&self.running_mean.reshape(shape)?)?
            .broadcast_mul(&scale)?
            .broadcast_add(&self.bias.reshape(shape)?)?;
        Ok(out)
    }
}

/// A convolution plus whatever normalization follows it.
enum ConvUnit {
    ConvBn {
        weight: Tensor,
        bn: BatchNorm,
        stride: usize,
        padding: usize,
    },
    Fused {
        weight: Tensor,
        bias: Tensor,
        stride: usize,
        padding: usize,
    },
}

impl ConvUnit {
    /// Load from either form: a `{bn}.running_mean` entry selects the eager
    /// form, a `{conv}.bias` entry the fused one.
    fn load(
        weights: &WeightMap,
        conv: &str,
        bn: &str,
        stride: usize,
        padding: usize,
        dtype: DType,
    ) -> Result<Self, InferenceError> {
        let weight = take(weights, &format!("{}.weight", conv))?.to_dtype(dtype)?;
        if weights.contains_key(&format!("{}.running_mean", bn)) {
            Ok(Self::ConvBn {
                weight,
                bn: BatchNorm::load(weights, bn, dtype)?,
                stride,
                padding,
            })
        } else {
            let bias = take(weights, &format!("{}.bias", conv))?.to_dtype(dtype)?;
            Ok(Self::Fused {
                weight,
                bias,
                stride,
                padding,
            })
        }
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor, InferenceError> {
        match self {
            Self::ConvBn {
                weight,
                bn,
                stride,
                padding,
            } => {
                let y = x.conv2d(weight, *padding, *stride, 1, 1)?;
                bn.forward(&y)
            }
            Self::Fused {
                weight,
                bias,
                stride,
                padding,
            } => {
                let channels = bias.dims1()?;
                let y = x.conv2d(weight, *padding, *stride, 1, 1)?;
                Ok(y.broadcast_add(&bias.reshape((1, channels, 1, 1))?)?)
            }
        }
    }

    /// Fold batch norm into the convolution, computed in f32 then cast.
    fn fuse(&self, dtype: DType) -> Result<Self, InferenceError> {
        match self {
            Self::ConvBn {
                weight,
                bn,
                stride,
                padding,
            } => {
                let weight = weight.to_dtype(DType::F32)?;
                let bn = BatchNorm {
                    weight: bn.weight.to_dtype(DType::F32)?,
                    bias: bn.bias.to_dtype(DType::F32)?,
                    running_mean: bn.running_mean.to_dtype(DType::F32)?,
                    running_var: bn.running_var.to_dtype(DType::F32)?,
                };
                let scale = bn.scale()?;
                let out_channels = scale.dims1()?;
                let fused_weight = weight.broadcast_mul(&scale.reshape((out_channels, 1, 1, 1))?)?;
                let fused_bias = bn.bias.sub(&bn.running_mean.mul(&scale)?)?;
                Ok(Self::Fused {
                    weight: fused_weight.to_dtype(dtype)?,
                    bias: fused_bias.to_dtype(dtype)?,
                    stride: *stride,
                    padding: *padding,
                })
            }
            Self::Fused {
                weight,
                bias,
                stride,
                padding,
            } => Ok(Self::Fused {
                weight: weight.to_dtype(dtype)?,
                bias: bias.to_dtype(dtype)?,
                stride: *stride,
                padding: *padding,
            }),
        }
    }

    fn export(&self, conv: &str, out: &mut WeightMap) -> Result<(), InferenceError> {
        match self {
            Self::Fused { weight, bias, .. } => {
                out.insert(format!("{}.weight", conv), weight.clone());
                out.insert(format!("{}.bias", conv), bias.clone());
                Ok(())
            }
            Self::ConvBn { .. } => Err(InferenceError::ExecutionFailure(format!(
                "convolution '{}' must be fused before export",
                conv
            ))),
        }
    }
}

struct BasicBlock {
    prefix: String,
    conv1: ConvUnit,
    conv2: ConvUnit,
    downsample: Option<ConvUnit>,
}

impl BasicBlock {
    fn load(
        weights: &WeightMap,
        prefix: String,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        dtype: DType,
    ) -> Result<Self, InferenceError> {
        let conv1 = ConvUnit::load(
            weights,
            &format!("{}.conv1", prefix),
            &format!("{}.bn1", prefix),
            stride,
            1,
            dtype,
        )?;
        let conv2 = ConvUnit::load(
            weights,
            &format!("{}.conv2", prefix),
            &format!("{}.bn2", prefix),
            1,
            1,
            dtype,
        )?;
        let downsample = if stride != 1 || in_channels != out_channels {
            Some(ConvUnit::load(
                weights,
                &format!("{}.downsample.0", prefix),
                &format!("{}.downsample.1", prefix),
                stride,
                0,
                dtype,
            )?)
        } else {
            None
        };
        Ok(Self {
            prefix,
            conv1,
            conv2,
            downsample,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor, InferenceError> {
        let residual = match &self.downsample {
            Some(ds) => ds.forward(x)?,
            None => x.clone(),
        };
        let y = self.conv1.forward(x)?.relu()?;
        let y = self.conv2.forward(&y)?;
        Ok((y + residual)?.relu()?)
    }

    fn fuse(&self, dtype: DType) -> Result<Self, InferenceError> {
        Ok(Self {
            prefix: self.prefix.clone(),
            conv1: self.conv1.fuse(dtype)?,
            conv2: self.conv2.fuse(dtype)?,
            downsample: self.downsample.as_ref().map(|d| d.fuse(dtype)).transpose()?,
        })
    }

    fn export(&self, out: &mut WeightMap) -> Result<(), InferenceError> {
        self.conv1.export(&format!("{}.conv1", self.prefix), out)?;
        self.conv2.export(&format!("{}.conv2", self.prefix), out)?;
        if let Some(ds) = &self.downsample {
            ds.export(&format!("{}.downsample.0", self.prefix), out)?;
        }
        Ok(())
    }
}

/// ResNet-18 classifier.
pub struct ResNet18 {
    form: ResNetForm,
    dtype: DType,
    stem: ConvUnit,
    blocks: Vec<BasicBlock>,
    fc_weight: Tensor,
    fc_bias: Tensor,
    num_classes: usize,
}

impl ResNet18 {
    /// Build from a state dict in either the eager or the fused form.
    pub fn from_weights(weights: &WeightMap, dtype: DType) -> Result<Self, InferenceError> {
        let stem = ConvUnit::load(weights, "conv1", "bn1", 2, 3, dtype)?;

        let mut blocks = Vec::with_capacity(STAGES.len() * BLOCKS_PER_STAGE);
        let mut in_channels = 64;
        for (stage, (channels, first_stride)) in STAGES.iter().enumerate() {
            for block in 0..BLOCKS_PER_STAGE {
                let stride = if block == 0 { *first_stride } else { 1 };
                let prefix = format!("layer{}.{}", stage + 1, block);
                blocks.push(BasicBlock::load(
                    weights,
                    prefix,
                    in_channels,
                    *channels,
                    stride,
                    dtype,
                )?);
                in_channels = *channels;
            }
        }

        let fc_weight = take(weights, "fc.weight")?.to_dtype(dtype)?;
        let fc_bias = take(weights, "fc.bias")?.to_dtype(dtype)?;
        let (num_classes, features) = fc_weight.dims2()?;
        if features != in_channels {
            return Err(InferenceError::Configuration(format!(
                "fc.weight expects {} features, backbone produces {}",
                features, in_channels
            )));
        }

        let form = match stem {
            ConvUnit::ConvBn { .. } => ResNetForm::Eager,
            ConvUnit::Fused { .. } => ResNetForm::Fused,
        };

        Ok(Self {
            form,
            dtype,
            stem,
            blocks,
            fc_weight,
            fc_bias,
            num_classes,
        })
    }

    pub fn form(&self) -> ResNetForm {
        self.form
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Fold every batch norm and cast to `dtype`.
    pub fn fuse(&self, dtype: DType) -> Result<Self, InferenceError> {
        Ok(Self {
            form: ResNetForm::Fused,
            dtype,
            stem: self.stem.fuse(dtype)?,
            blocks: self
                .blocks
                .iter()
                .map(|b| b.fuse(dtype))
                .collect::<Result<Vec<_>, _>>()?,
            fc_weight: self.fc_weight.to_dtype(dtype)?,
            fc_bias: self.fc_bias.to_dtype(dtype)?,
            num_classes: self.num_classes,
        })
    }

    /// Flatten a fused network back into named tensors.
    pub fn export(&self) -> Result<WeightMap, InferenceError> {
        let mut out = WeightMap::new();
        self.stem.export("conv1", &mut out)?;
        for block in &self.blocks {
            block.export(&mut out)?;
        }
        out.insert("fc.weight".into(), self.fc_weight.clone());
        out.insert("fc.bias".into(), self.fc_bias.clone());
        Ok(out)
    }
}

impl ClassifierModel for ResNet18 {
    fn name(&self) -> &str {
        match self.form {
            ResNetForm::Eager => "resnet18",
            ResNetForm::Fused => "resnet18-fused",
        }
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, InferenceError> {
        let x = self.stem.forward(input)?.relu()?;
        // Zero padding is exact here: the input is post-ReLU.
        let mut x = x
            .pad_with_zeros(2, 1, 1)?
            .pad_with_zeros(3, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;
        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        let pooled = x.mean(D::Minus1)?.mean(D::Minus1)?;
        let logits = pooled
            .matmul(&self.fc_weight.t()?)?
            .broadcast_add(&self.fc_bias)?;
        Ok(logits)
    }
}

/// Every parameter of an eager ResNet-18 state dict with its shape.
pub fn parameter_shapes(num_classes: usize) -> Vec<(String, Vec<usize>)> {
    let mut shapes = Vec::new();
    let push_bn = |shapes: &mut Vec<(String, Vec<usize>)>, prefix: &str, c: usize| {
        for suffix in ["weight", "bias", "running_mean", "running_var"] {
            shapes.push((format!("{}.{}", prefix, suffix), vec![c]));
        }
    };

    shapes.push(("conv1.weight".into(), vec![64, 3, 7, 7]));
    push_bn(&mut shapes, "bn1", 64);

    let mut in_channels = 64;
    for (stage, (channels, first_stride)) in STAGES.iter().enumerate() {
        for block in 0..BLOCKS_PER_STAGE {
            let prefix = format!("layer{}.{}", stage + 1, block);
            let block_in = if block == 0 { in_channels } else { *channels };
            shapes.push((format!("{}.conv1.weight", prefix), vec![*channels, block_in, 3, 3]));
            push_bn(&mut shapes, &format!("{}.bn1", prefix), *channels);
            shapes.push((format!("{}.conv2.weight", prefix), vec![*channels, *channels, 3, 3]));
            push_bn(&mut shapes, &format!("{}.bn2", prefix), *channels);
            if block == 0 && (*first_stride != 1 || block_in != *channels) {
                shapes.push((
                    format!("{}.downsample.0.weight", prefix),
                    vec![*channels, block_in, 1, 1],
                ));
                push_bn(&mut shapes, &format!("{}.downsample.1", prefix), *channels);
            }
        }
        in_channels = *channels;
    }

    shapes.push(("fc.weight".into(), vec![num_classes, 512]));
    shapes.push(("fc.bias".into(), vec![num_classes]));
    shapes
}

#[cfg(test)]
#[path = "resnet_tests.rs"]
pub(crate) mod tests;
