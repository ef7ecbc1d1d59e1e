//! Segmentation backend for builds without a segmentation model
//!
//! Distributions that ship without a model runtime still link the engine;
//! they wire it to this backend so every request fails predictably with
//! `UnsupportedOperation` instead of crashing.

use crate::{
    error::{BgRemovalError, Result},
    inference::SegmentationBackend,
    types::{Mask, PixelBuffer},
};

/// Backend that never segments
#[derive(Debug, Clone, Default)]
pub struct UnavailableBackend {
    reason: Option<String>,
}

impl UnavailableBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a reason that ends up in the failure message
    pub fn with_reason<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

impl SegmentationBackend for UnavailableBackend {
    fn infer(&self, _image: &PixelBuffer) -> Result<Mask> {
        let message = match &self.reason {
            Some(reason) => format!("background removal is not available in this build: {reason}"),
            None => "background removal is not available in this build".to_string(),
        };
        Err(BgRemovalError::unsupported(message))
    }

    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, types::PixelFormat};

    #[test]
    fn test_always_unsupported() {
        let backend = UnavailableBackend::new();
        assert!(!backend.is_available());

        let tiny = PixelBuffer::from_pixel(1, 1, PixelFormat::Rgba8, &[0, 0, 0, 255]).unwrap();
        let err = backend.infer(&tiny).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

        // input content is irrelevant, even malformed buffers
        let broken = PixelBuffer {
            width: 0,
            height: 0,
            format: PixelFormat::Rgb8,
            data: Vec::new(),
        };
        assert_eq!(
            backend.infer(&broken).unwrap_err().kind(),
            ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    fn test_reason_in_message() {
        let backend = UnavailableBackend::with_reason("compiled without model runtime");
        let image = PixelBuffer::from_pixel(2, 2, PixelFormat::Rgb8, &[0, 0, 0]).unwrap();
        let message = backend.infer(&image).unwrap_err().to_string();
        assert!(message.contains("compiled without model runtime"));
    }
}
