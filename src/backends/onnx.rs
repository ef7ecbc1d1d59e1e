//! ONNX Runtime backend implementation for segmentation models
//!
//! Supports CPU, CUDA and `CoreML` execution providers. An ONNX Runtime
//! session needs exclusive access to run, so concurrent requests are
//! serialised on the session lock.

use crate::config::{ExecutionProvider, RuntimeOptions};
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelSpec, PreprocessingConfig};
use instant::Instant;
use log;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};
use std::sync::Mutex;

/// ONNX Runtime backend for running segmentation models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Mutex<Session>,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers with availability status
    ///
    /// Returns `(name, available, description)` tuples.
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, no acceleration".to_string(),
            ),
            (
                "CUDA".to_string(),
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false),
                "NVIDIA GPU acceleration".to_string(),
            ),
            (
                "CoreML".to_string(),
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false),
                "Apple Neural Engine and GPU acceleration".to_string(),
            ),
        ]
    }

    /// Resolve the requested provider into the providers actually registered
    fn execution_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        let mut providers = Vec::new();
        match requested {
            ExecutionProvider::Auto => {
                if cuda_available {
                    log::info!("CUDA execution provider is available and will be used");
                    providers.push(CUDAExecutionProvider::default().build());
                }
                if coreml_available {
                    log::info!("CoreML execution provider is available and will be used");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::warn!("No hardware acceleration available, falling back to CPU");
                }
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
            },
            ExecutionProvider::Cuda => {
                if cuda_available {
                    log::info!("Using CUDA execution provider");
                    providers.push(CUDAExecutionProvider::default().build());
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available {
                    log::info!("Using CoreML execution provider (explicitly requested)");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                }
            },
        }
        providers
    }

    /// Create a session for the model described by `spec`
    ///
    /// # Errors
    /// - Model bytes unreadable
    /// - Session creation or provider registration failures
    pub fn load(spec: &ModelSpec, options: &RuntimeOptions) -> Result<Self> {
        let model_load_start = Instant::now();
        spec.preprocessing.validate()?;

        let model_data = spec.load_bytes()?;
        let model_info = ModelInfo::from_spec(spec, model_data.len());

        let session_error = |what: &str, e: ort::Error| {
            BgRemovalError::model(format!("Failed to {what}: {e}"))
        };

        let mut session_builder = Session::builder()
            .map_err(|e| session_error("create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| session_error("set optimization level", e))?;

        let providers = Self::execution_providers(options.execution_provider);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| session_error("register execution providers", e))?;
        }

        let parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        let intra_threads = if options.intra_threads > 0 {
            options.intra_threads
        } else {
            parallelism
        };
        let inter_threads = if options.inter_threads > 0 {
            options.inter_threads
        } else {
            (parallelism / 4).max(1)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| session_error("set intra threads", e))?
            .with_inter_threads(inter_threads)
            .map_err(|e| session_error("set inter threads", e))?
            .commit_from_memory(&model_data)
            .map_err(|e| session_error("create session from model data", e))?;

        log::debug!("ONNX Runtime session created");
        log::debug!("  - Requested provider: {}", options.execution_provider);
        log::debug!("  - Threading: {intra_threads} intra-op, {inter_threads} inter-op");
        log::debug!("  - Model: {}", model_info.name);
        log::info!(
            "Model loading complete: {:.0}ms",
            model_load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self {
            session: Mutex::new(session),
            model_info,
            preprocessing_config: spec.preprocessing.clone(),
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();
        log::debug!("Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| BgRemovalError::inference("ONNX session lock poisoned"))?;

        let outputs = session.run(ort::inputs![input_value]).map_err(|e| {
            BgRemovalError::inference_error_with_provider(
                "onnxruntime",
                "Model inference",
                &e.to_string(),
                &["retry with the CPU execution provider"],
            )
        })?;

        // positional access, output names differ between model exports
        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output_shape = output_tensor.shape().to_vec();
        let &[batch, channels, height, width] = output_shape.as_slice() else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output_array = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_tensor.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
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
        "onnx"
    }
}
