//! Model specification and loading
//!
//! A segmentation model is an ONNX graph plus the preprocessing it was
//! trained with. Models are supplied by the embedding application; packaging
//! and downloading them is outside this crate.

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the model bytes come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// ONNX file on the local filesystem
    File(PathBuf),
    /// ONNX bytes already in memory (bundled with the application)
    #[serde(skip)]
    Bytes(Vec<u8>),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::File(path) => format!(
                "file:{}",
                path.file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or("unknown")
            ),
            ModelSource::Bytes(bytes) => format!("memory:{}b", bytes.len()),
        }
    }
}

/// Preprocessing parameters a model expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square model input edge in pixels
    pub target_size: u32,
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
    /// Letterbox fill colour
    pub padding_color: [u8; 3],
}

impl Default for PreprocessingConfig {
    /// `ISNet` general-use settings
    fn default() -> Self {
        Self {
            target_size: 1024,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
            padding_color: [255, 255, 255],
        }
    }
}

impl PreprocessingConfig {
    /// Validate sizes and normalization
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(BgRemovalError::config_value_error(
                "model target size",
                self.target_size,
                "> 0",
            ));
        }
        if self
            .normalization_std
            .iter()
            .any(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err(BgRemovalError::invalid_config(
                "normalization std values must be finite and positive",
            ));
        }
        Ok(())
    }
}

/// Specification of which model to run and how to feed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
}

impl ModelSpec {
    /// Model file with default preprocessing
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ModelSource::File(path.into()),
            preprocessing: PreprocessingConfig::default(),
        }
    }

    #[must_use]
    pub fn with_preprocessing(mut self, preprocessing: PreprocessingConfig) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or unreadable
    /// - Empty model data
    pub fn load_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match &self.source {
            ModelSource::File(path) => std::fs::read(path).map_err(|e| {
                BgRemovalError::model(format!(
                    "Failed to read model '{}': {}",
                    path.display(),
                    e
                ))
            })?,
            ModelSource::Bytes(bytes) => bytes.clone(),
        };
        if bytes.is_empty() {
            return Err(BgRemovalError::model(format!(
                "Model {} is empty",
                self.source.display_name()
            )));
        }
        Ok(bytes)
    }
}

/// Information about a loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
}

impl ModelInfo {
    #[must_use]
    pub fn from_spec(spec: &ModelSpec, size_bytes: usize) -> Self {
        let edge = spec.preprocessing.target_size as usize;
        Self {
            name: spec.source.display_name(),
            size_bytes,
            input_shape: (1, 3, edge, edge),
        }
    }
}
