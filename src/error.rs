//! Error types for background removal operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Classification attached to every failed removal
///
/// Callers branch on this tag for user-facing messaging; the message carried
/// next to it is for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or empty pixel buffer. Caller error, never retried.
    InvalidInput,
    /// This build or deployment has no segmentation capability.
    UnsupportedOperation,
    /// The segmentation model or its runtime failed during inference.
    BackendFailure,
    /// Internal contract breach, e.g. mask and image dimensions differ.
    InvariantViolation,
}

impl ErrorKind {
    /// Whether the failure should be presented to the end user.
    ///
    /// `InvariantViolation` is an engine bug and is reported through logs.
    #[must_use]
    pub fn is_user_facing(self) -> bool {
        !matches!(self, Self::InvariantViolation)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid input"),
            Self::UnsupportedOperation => write!(f, "feature unavailable"),
            Self::BackendFailure => write!(f, "backend failure"),
            Self::InvariantViolation => write!(f, "invariant violation"),
        }
    }
}

/// Error type for background removal operations
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input/output errors (model file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image conversion errors from the `image` crate
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration file parse errors
    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed pixel buffers and unsupported pixel formats
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Segmentation is not available in this build
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal contract breach
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl BgRemovalError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invariant violation error
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create inference error with provider context
    pub fn inference_error_with_provider(
        provider: &str,
        operation: &str,
        error: &str,
        fallback_suggestions: &[&str],
    ) -> Self {
        let suggestions = if fallback_suggestions.is_empty() {
            String::new()
        } else {
            format!(" Try: {}", fallback_suggestions.join(" or "))
        };

        Self::Inference(format!(
            "{} failed using '{}' provider: {}.{}",
            operation, provider, error, suggestions
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Classify this error for the caller
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::InvalidConfig(_) | Self::Image(_) | Self::Json(_) => {
                ErrorKind::InvalidInput
            },
            Self::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Self::Inference(_) | Self::Model(_) | Self::Io(_) => ErrorKind::BackendFailure,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }
}
