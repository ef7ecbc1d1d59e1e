//! Tract backend implementation for segmentation models
//!
//! Tract is a pure Rust inference library: no native runtime to ship, which
//! makes it the default capable backend. A runnable Tract plan is immutable,
//! so overlapping requests run inference concurrently through `&self`.

use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelSpec, PreprocessingConfig};
use instant::Instant;
use log;
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running segmentation models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: TractModel,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
}

impl TractBackend {
    /// Load, optimise and plan the model described by `spec`
    ///
    /// # Errors
    /// - Model bytes unreadable
    /// - ONNX graph rejected by Tract
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        let model_load_start = Instant::now();
        spec.preprocessing.validate()?;

        let model_data = spec.load_bytes()?;
        let model_info = ModelInfo::from_spec(spec, model_data.len());
        let edge = spec.preprocessing.target_size as usize;

        log::info!("Initializing Tract backend");
        log::info!("  Model: {}", model_info.name);
        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for logging display
        let size_mb = model_info.size_bytes as f64 / (1024.0 * 1024.0);
        log::info!("  Model size: {size_mb:.2} MB");
        log::debug!("  Input fact: 1x3x{edge}x{edge} f32");

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, edge, edge]).into())
            .map_err(|e| BgRemovalError::model(format!("Failed to set model input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create runnable model: {e}"))
            })?;

        log::info!(
            "Tract backend initialized in {}ms",
            model_load_start.elapsed().as_millis()
        );

        Ok(Self {
            model,
            model_info,
            preprocessing_config: spec.preprocessing.clone(),
        })
    }
}

impl InferenceBackend for TractBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        log::debug!("Running Tract inference, input tensor {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = self
            .model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_shape = output_data.shape().to_vec();
        let &[batch, channels, height, width] = output_shape.as_slice() else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output_array = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_data.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(output_array)
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing_config
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model_info
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
