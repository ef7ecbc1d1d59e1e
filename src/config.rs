//! Configuration types for the background removal engine

use crate::{
    compositor::CompositorConfig,
    error::{BgRemovalError, Result},
    models::ModelSpec,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Segmentation backend selected when the engine is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// No segmentation; every request fails with `UnsupportedOperation`
    #[default]
    Unavailable,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
}

impl BackendKind {
    /// Backends compiled into this build
    #[must_use]
    pub fn available() -> Vec<Self> {
        let mut kinds = vec![Self::Unavailable];
        #[cfg(feature = "tract")]
        kinds.push(Self::Tract);
        #[cfg(feature = "onnx")]
        kinds.push(Self::Onnx);
        kinds
    }

    #[must_use]
    pub fn is_compiled(self) -> bool {
        Self::available().contains(&self)
    }

    /// Whether this backend runs a model and therefore needs a [`ModelSpec`]
    #[must_use]
    pub fn requires_model(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Tract => write!(f, "tract"),
            Self::Onnx => write!(f, "onnx"),
        }
    }
}

/// Runtime tuning handed to tensor backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub execution_provider: ExecutionProvider,
    /// Intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Inter-op threads (0 = auto)
    pub inter_threads: usize,
}

/// Configuration for [`BackgroundRemovalEngine`](crate::BackgroundRemovalEngine)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Segmentation backend
    pub backend: BackendKind,

    /// Model to load; required by every backend except `Unavailable`
    pub model: Option<ModelSpec>,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Mask compositing options
    pub compositor: CompositorConfig,

    /// Enable debug mode (per-request mask statistics in the logs)
    pub debug: bool,
}

impl EngineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_engine::{BackendKind, CompositorConfig, EngineConfig};
    ///
    /// let config = EngineConfig::builder()
    ///     .backend(BackendKind::Unavailable)
    ///     .compositor(CompositorConfig::hard(0.5))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.compositor.threshold, Some(0.5));
    /// ```
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Compositor threshold outside `[0, 1]`
    /// - Backend not compiled into this build
    /// - Model backend without a model, or invalid preprocessing parameters
    pub fn validate(&self) -> Result<()> {
        self.compositor.validate()?;

        if !self.backend.is_compiled() {
            return Err(BgRemovalError::invalid_config(format!(
                "backend '{}' is not compiled into this build (available: {})",
                self.backend,
                BackendKind::available()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        match (&self.model, self.backend.requires_model()) {
            (None, true) => Err(BgRemovalError::invalid_config(format!(
                "backend '{}' requires a model",
                self.backend
            ))),
            (Some(model), _) => model.preprocessing.validate(),
            (None, false) => Ok(()),
        }
    }

    /// Parse and validate a JSON configuration
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Validation failures, see [`EngineConfig::validate`]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    ///
    /// # Errors
    /// - File unreadable
    /// - Malformed JSON or validation failures
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            execution_provider: self.execution_provider,
            intra_threads: self.intra_threads,
            inter_threads: self.inter_threads,
        }
    }
}

/// Builder for `EngineConfig`
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelSpec) -> Self {
        self.config.model = Some(model);
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both intra and inter threads (inter gets half, minimum 1; 0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn compositor(mut self, compositor: CompositorConfig) -> Self {
        self.config.compositor = compositor;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Validation failures, see [`EngineConfig::validate`]
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, BackendKind::Unavailable);
        assert!(config.model.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_out_of_range_threshold() {
        for threshold in [-0.1, 1.5, f32::NAN] {
            let err = EngineConfig::builder()
                .compositor(CompositorConfig::hard(threshold))
                .build()
                .unwrap_err();
            assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
        }
        assert!(EngineConfig::builder()
            .compositor(CompositorConfig::hard(1.0))
            .build()
            .is_ok());
    }

    #[test]
    fn test_model_backend_requires_model() {
        for kind in BackendKind::available() {
            if !kind.requires_model() {
                continue;
            }
            let err = EngineConfig::builder().backend(kind).build().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert!(err.to_string().contains("requires a model"));
        }
    }

    #[test]
    fn test_available_backends() {
        let available = BackendKind::available();
        assert_eq!(available.first(), Some(&BackendKind::Unavailable));
        assert_eq!(available.contains(&BackendKind::Tract), cfg!(feature = "tract"));
        assert_eq!(available.contains(&BackendKind::Onnx), cfg!(feature = "onnx"));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_backend_not_compiled() {
        let err = EngineConfig::builder()
            .backend(BackendKind::Onnx)
            .model(ModelSpec::from_file("model.onnx"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not compiled"));
    }

    #[test]
    fn test_num_threads() {
        let config = EngineConfig::builder().num_threads(8).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (8, 4));

        let config = EngineConfig::builder().num_threads(1).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (1, 1));

        let config = EngineConfig::builder().num_threads(0).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (0, 0));
    }

    #[test]
    fn test_from_json_str_defaults_missing_fields() {
        let config = EngineConfig::from_json_str(r#"{"compositor": {"threshold": 0.25}}"#)
            .unwrap();
        assert_eq!(config.backend, BackendKind::Unavailable);
        assert_eq!(config.compositor.threshold, Some(0.25));
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
    }

    #[test]
    fn test_from_json_str_full() {
        let json = r#"{
            "backend": "unavailable",
            "model": {"source": {"File": "/models/isnet.onnx"}},
            "execution_provider": "cpu",
            "intra_threads": 4,
            "inter_threads": 2,
            "compositor": {"threshold": null},
            "debug": true
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.runtime_options().intra_threads, 4);
        assert!(config.debug);
        let model = config.model.unwrap();
        assert_eq!(model.preprocessing.target_size, 1024);
    }

    #[test]
    fn test_from_json_str_rejects_invalid() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, BgRemovalError::Json(_)));

        let err = EngineConfig::from_json_str(r#"{"compositor": {"threshold": 2.0}}"#)
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(BackendKind::Tract.to_string(), "tract");
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
    }
}
