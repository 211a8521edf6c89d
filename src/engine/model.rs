// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Classification model abstraction and label sets.

use std::path::Path;

use candle_core::Tensor;

use super::error::InferenceError;

/// A network mapping a `[N, 3, H, W]` batch to `[N, classes]` logits.
///
/// Implementations are immutable after construction and shared across
/// concurrent requests.
pub trait ClassifierModel: Send + Sync {
    /// Short human-readable architecture name.
    fn name(&self) -> &str;

    fn num_classes(&self) -> usize;

    fn forward(&self, input: &Tensor) -> Result<Tensor, InferenceError>;
}

/// Ordered class names, indexed by logit position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Placeholder names `class_0 .. class_{n-1}`.
    pub fn generic(num_classes: usize) -> Self {
        Self {
            labels: (0..num_classes).map(|idx| format!("class_{}", idx)).collect(),
        }
    }

    /// Read one label per non-empty line.
    pub fn from_file(path: &Path) -> Result<Self, InferenceError> {
        let text = std::fs::read_to_string(path)?;
        let labels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if labels.is_empty() {
            return Err(InferenceError::Configuration(format!(
                "label file {} is empty",
                path.display()
            )));
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label for `idx`, or the generic `class_{idx}` name when unknown.
    pub fn name(&self, idx: usize) -> String {
        self.labels
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_generic_labels() {
        let labels = LabelSet::generic(3);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(0), "class_0");
        assert_eq!(labels.name(2), "class_2");
    }

    #[test]
    fn test_unknown_index_falls_back_to_generic_name() {
        let labels = LabelSet::new(vec!["cat".into()]);
        assert_eq!(labels.name(0), "cat");
        assert_eq!(labels.name(7), "class_7");
    }

    #[test]
    fn test_from_file_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tench\n\n goldfish \nshark").unwrap();
        let labels = LabelSet::from_file(file.path()).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(1), "goldfish");
    }

    #[test]
    fn test_from_file_rejects_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(LabelSet::from_file(file.path()).is_err());
    }
}
