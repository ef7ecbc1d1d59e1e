//! Segmentation backend abstraction
//!
//! Two layers:
//! - [`SegmentationBackend`] is what the engine talks to: pixels in, mask out.
//!   Variants are chosen when the engine is built, never per call.
//! - [`InferenceBackend`] is the tensor-level runtime (Tract, ONNX Runtime)
//!   that [`ModelSegmentation`] wraps to form the capable variant.

use crate::{
    error::Result,
    models::{ModelInfo, PreprocessingConfig},
    types::{Mask, PixelBuffer},
    utils::ImagePreprocessor,
};
use ndarray::Array4;
use tracing::{debug, span, Level};

/// Produces foreground masks from pixel buffers
///
/// Implementations are shared across concurrent requests and must either
/// serve overlapping `infer` calls or serialise them internally; one
/// request's mask must never contain another request's data.
pub trait SegmentationBackend: Send + Sync {
    /// Segment `image` into a mask of identical dimensions
    ///
    /// A single attempt; failures are reported, never retried here.
    ///
    /// # Errors
    /// - `InvalidInput` for empty or malformed buffers
    /// - `UnsupportedOperation` when this build cannot segment
    /// - `Inference`/`Model` when the runtime fails
    fn infer(&self, image: &PixelBuffer) -> Result<Mask>;

    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether this backend can produce masks at all
    fn is_available(&self) -> bool {
        true
    }
}

/// Tensor-level inference runtime
pub trait InferenceBackend: Send + Sync {
    /// Run inference on an NCHW input tensor
    ///
    /// # Errors
    /// - Model inference failures
    /// - Tensor conversion or shape errors
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get preprocessing configuration for this backend
    fn preprocessing_config(&self) -> &PreprocessingConfig;

    /// Get model information for this backend
    fn model_info(&self) -> &ModelInfo;

    /// Runtime name for logs
    fn name(&self) -> &'static str;
}

/// Capable segmentation: letterbox, run the model, map the output back
#[derive(Debug)]
pub struct ModelSegmentation<B> {
    backend: B,
}

impl<B: InferenceBackend> ModelSegmentation<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: InferenceBackend> SegmentationBackend for ModelSegmentation<B> {
    fn infer(&self, image: &PixelBuffer) -> Result<Mask> {
        image.validate()?;

        let (input, letterbox) = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                width = image.width,
                height = image.height
            )
            .entered();
            ImagePreprocessor::preprocess_for_inference(image, self.backend.preprocessing_config())?
        };

        let output = {
            let _span = span!(Level::DEBUG, "model_inference", runtime = self.backend.name())
                .entered();
            self.backend.infer(&input)?
        };
        debug!(output_shape = ?output.shape(), "model output received");

        ImagePreprocessor::tensor_to_mask(&output, &letterbox)
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}
