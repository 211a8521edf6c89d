// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Compiled execution artifact cache.
//!
//! The artifact lives at a single filesystem path. An existing file is
//! reused as-is (a header that disagrees with the requested profile only
//! produces a warning); a missing one is compiled, written and loaded. The
//! `force` flag rebuilds unconditionally.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::compiler::{GraphCompiler, LoadedGraph};
use super::error::InferenceError;
use super::gpu::{DeviceSpec, Precision};
use super::model::ClassifierModel;

/// Batch range and numeric mode an artifact is built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileProfile {
    pub device: String,
    pub precision: Precision,
    pub min_batch: usize,
    pub opt_batch: usize,
    pub max_batch: usize,
}

impl CompileProfile {
    /// `min = 1`, `opt = max / 2 + 1`, `max = max_batch` (at least 1).
    pub fn for_max_batch(device: DeviceSpec, precision: Precision, max_batch: usize) -> Self {
        let max_batch = max_batch.max(1);
        Self {
            device: device.to_string(),
            precision,
            min_batch: 1,
            opt_batch: max_batch / 2 + 1,
            max_batch,
        }
    }

    /// Kernel precisions the graph may use. Half precision still admits
    /// full-precision kernels.
    pub fn enabled_precisions(&self) -> Vec<Precision> {
        match self.precision {
            Precision::Fp16 => vec![Precision::Fp32, Precision::Fp16],
            Precision::Fp32 => vec![Precision::Fp32],
        }
    }

    pub fn to_metadata(&self) -> HashMap<String, String> {
        let enabled: Vec<String> = self.enabled_precisions().iter().map(|p| p.to_string()).collect();
        HashMap::from([
            ("device".to_string(), self.device.clone()),
            ("precision".to_string(), self.precision.to_string()),
            ("enabled_precisions".to_string(), enabled.join(",")),
            ("min_batch".to_string(), self.min_batch.to_string()),
            ("opt_batch".to_string(), self.opt_batch.to_string()),
            ("max_batch".to_string(), self.max_batch.to_string()),
        ])
    }

    /// Parse a header written by `to_metadata`; `None` if any field is
    /// missing or malformed.
    pub fn from_metadata(meta: &HashMap<String, String>) -> Option<Self> {
        let batch = |key: &str| meta.get(key)?.parse::<usize>().ok();
        Some(Self {
            device: meta.get("device")?.clone(),
            precision: meta.get("precision")?.parse().ok()?,
            min_batch: batch("min_batch")?,
            opt_batch: batch("opt_batch")?,
            max_batch: batch("max_batch")?,
        })
    }

    pub fn admits(&self, batch: usize) -> bool {
        (self.min_batch..=self.max_batch).contains(&batch)
    }
}

/// A loaded, ready-to-run compiled graph.
pub struct CompiledArtifact {
    model: Arc<dyn ClassifierModel>,
    profile: CompileProfile,
    path: PathBuf,
    digest: String,
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("path", &self.path)
            .field("profile", &self.profile)
            .field("digest", &self.digest)
            .finish()
    }
}

impl CompiledArtifact {
    pub fn profile(&self) -> &CompileProfile {
        &self.profile
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hex SHA-256 of the artifact file.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Run the graph; batches outside the compiled range are rejected.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, InferenceError> {
        let batch = input.dim(0)?;
        if !self.profile.admits(batch) {
            return Err(InferenceError::ExecutionFailure(format!(
                "batch {} outside compiled range {}..={}",
                batch, self.profile.min_batch, self.profile.max_batch
            )));
        }
        self.model.forward(input)
    }
}

/// File-backed cache for one compiled artifact.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    path: PathBuf,
    force: bool,
}

impl ArtifactCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            force: false,
        }
    }

    /// Rebuild even when a file already exists.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the artifact, compiling it first when absent.
    ///
    /// Returns `Ok(None)` when the compiler cannot target `device`; the
    /// caller then runs the eager model.
    pub fn load_or_compile(
        &self,
        compiler: &dyn GraphCompiler,
        profile: &CompileProfile,
        device: &Device,
    ) -> Result<Option<CompiledArtifact>, InferenceError> {
        if self.exists() && !self.force {
            return self.load(compiler, profile, device).map(Some);
        }

        match compiler.check_available(device) {
            Ok(()) => {}
            Err(InferenceError::CompilationUnavailable(reason)) => {
                tracing::info!(compiler = compiler.name(), reason = %reason, "Compiled execution unavailable, using eager model");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            path = %self.path.display(),
            compiler = compiler.name(),
            precision = %profile.precision,
            min_batch = profile.min_batch,
            opt_batch = profile.opt_batch,
            max_batch = profile.max_batch,
            "Compiling execution artifact"
        );
        let bytes = compiler.compile(profile)?;

        write_atomically(&self.path, &bytes)?;

        let digest = hex::encode(Sha256::digest(&bytes));
        let loaded = compiler
            .load(&bytes, device)
            .map_err(|e| InferenceError::artifact(&self.path, e))?;
        tracing::info!(path = %self.path.display(), sha256 = %digest, bytes = bytes.len(), "Artifact written");

        Ok(Some(self.finish(loaded, profile, digest)))
    }

    fn load(
        &self,
        compiler: &dyn GraphCompiler,
        profile: &CompileProfile,
        device: &Device,
    ) -> Result<CompiledArtifact, InferenceError> {
        let file = File::open(&self.path).map_err(|e| InferenceError::artifact(&self.path, e))?;
        // SAFETY: the mapping is read-only and dropped before this function returns.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| InferenceError::artifact(&self.path, e))?;

        let digest = hex::encode(Sha256::digest(&mmap[..]));
        let loaded = compiler
            .load(&mmap, device)
            .map_err(|e| InferenceError::artifact(&self.path, e))?;
        tracing::info!(path = %self.path.display(), sha256 = %digest, bytes = mmap.len(), "Loaded cached artifact");

        Ok(self.finish(loaded, profile, digest))
    }

    fn finish(&self, loaded: LoadedGraph, requested: &CompileProfile, digest: String) -> CompiledArtifact {
        let profile = match loaded.profile {
            Some(stored) => {
                if stored != *requested {
                    tracing::warn!(
                        path = %self.path.display(),
                        stored = ?stored,
                        requested = ?requested,
                        "Cached artifact was built for a different profile; delete it or pass --force to rebuild"
                    );
                }
                stored
            }
            None => requested.clone(),
        };
        CompiledArtifact {
            model: loaded.model,
            profile,
            path: self.path.clone(),
            digest,
        }
    }
}

/// Write through a sibling temp file and rename it into place, so a crash
/// mid-write never leaves a truncated artifact at `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), InferenceError> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| InferenceError::artifact(path, e))?;

    let mut staged = NamedTempFile::new_in(parent).map_err(|e| InferenceError::artifact(path, e))?;
    staged
        .write_all(bytes)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| InferenceError::artifact(path, e))?;
    staged
        .persist(path)
        .map_err(|e| InferenceError::artifact(path, e.error))?;
    Ok(())
}
