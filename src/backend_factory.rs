//! Resolves a configured [`BackendKind`] into a segmentation backend

use crate::{
    backends::UnavailableBackend,
    config::{BackendKind, EngineConfig},
    error::{BgRemovalError, Result},
    inference::SegmentationBackend,
};
use std::sync::Arc;

#[cfg(any(feature = "tract", feature = "onnx"))]
use crate::{inference::ModelSegmentation, models::ModelSpec};

/// Factory trait for creating segmentation backends
pub trait BackendFactory: Send + Sync {
    /// Create the backend selected by `config`
    ///
    /// # Errors
    /// - Backend kinds this factory cannot build
    /// - Model loading or backend initialization failures
    fn create_backend(&self, config: &EngineConfig) -> Result<Arc<dyn SegmentationBackend>>;

    /// List backend kinds this factory can build
    fn available_backends(&self) -> Vec<BackendKind>;
}

/// Builds every backend compiled into this crate
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl DefaultBackendFactory {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[cfg(any(feature = "tract", feature = "onnx"))]
    fn model_spec(config: &EngineConfig) -> Result<&ModelSpec> {
        config.model.as_ref().ok_or_else(|| {
            BgRemovalError::invalid_config(format!("backend '{}' requires a model", config.backend))
        })
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, config: &EngineConfig) -> Result<Arc<dyn SegmentationBackend>> {
        match config.backend {
            BackendKind::Unavailable => Ok(Arc::new(UnavailableBackend::new())),
            #[cfg(feature = "tract")]
            BackendKind::Tract => {
                let backend = crate::backends::TractBackend::load(Self::model_spec(config)?)?;
                Ok(Arc::new(ModelSegmentation::new(backend)))
            },
            #[cfg(feature = "onnx")]
            BackendKind::Onnx => {
                let backend = crate::backends::OnnxBackend::load(
                    Self::model_spec(config)?,
                    &config.runtime_options(),
                )?;
                Ok(Arc::new(ModelSegmentation::new(backend)))
            },
            #[allow(unreachable_patterns)]
            other => Err(BgRemovalError::invalid_config(format!(
                "backend '{other}' is not compiled into this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendKind> {
        BackendKind::available()
    }
}
