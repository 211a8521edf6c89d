// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! ONNX eager backend using Candle.
//!
//! Lets the engine run an exported `.onnx` classifier when no safetensors
//! checkpoint is available. ONNX graphs are not fused or compiled.

mod classifier;

pub use classifier::OnnxClassifier;
