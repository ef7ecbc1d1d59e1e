#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Engine
//!
//! Cuts the background out of an image: a segmentation backend predicts a
//! per-pixel foreground confidence, and a compositor writes that confidence
//! into the image's alpha channel.
//!
//! ## Features
//!
//! - **Capability polymorphism**: model-backed segmentation (Tract or ONNX
//!   Runtime) or an unavailable backend that fails every request with
//!   `UnsupportedOperation`, chosen when the engine is built
//! - **Soft edges**: partial confidence yields partial transparency, with an
//!   optional hard threshold
//! - **Async callback contract**: work runs on the caller's tokio runtime,
//!   the callback fires exactly once per request that was not cancelled
//! - **Cancellation** through `tokio_util` cancellation tokens
//! - **Classified failures**: every failure carries an [`ErrorKind`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_engine::{
//!     BackendKind, BackgroundRemovalEngine, EngineConfig, ModelSpec, PixelBuffer,
//!     SchedulingContext,
//! };
//!
//! # async fn example(image: PixelBuffer) -> anyhow::Result<()> {
//! let config = EngineConfig::builder()
//!     .backend(BackendKind::Tract)
//!     .model(ModelSpec::from_file("models/isnet-general.onnx"))
//!     .build()?;
//! let engine = BackgroundRemovalEngine::from_config(&config)?;
//!
//! let context = SchedulingContext::current()?;
//! let mut handle = engine.remove_background_image(image, &context, |result| {
//!     match result.into_image() {
//!         Ok(cutout) => println!("cutout {}x{}", cutout.width, cutout.height),
//!         Err(failure) => eprintln!("background removal failed: {failure}"),
//!     }
//! });
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): Pure Rust inference backend
//! - `onnx`: ONNX Runtime backend with CUDA and `CoreML` execution providers
//! - `tracing-init`: subscriber setup through [`TracingConfig`]
//! - `tracing-json`: JSON log output
//!
//! Without `tract` and `onnx` the crate still builds; the engine is then
//! limited to the unavailable backend.

pub mod backend_factory;
pub mod backends;
pub mod compositor;
pub mod config;
pub mod engine;
pub mod error;
pub mod inference;
pub mod models;
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backend_factory::{BackendFactory, DefaultBackendFactory};
pub use backends::*;
pub use compositor::{CompositorConfig, MaskCompositor};
pub use config::{
    BackendKind, EngineConfig, EngineConfigBuilder, ExecutionProvider, RuntimeOptions,
};
pub use engine::{BackgroundRemovalEngine, RemovalHandle, SchedulingContext};
pub use error::{BgRemovalError, ErrorKind, Result};
pub use inference::{InferenceBackend, ModelSegmentation, SegmentationBackend};
pub use models::{ModelInfo, ModelSource, ModelSpec, PreprocessingConfig};
pub use tracing_config::{TracingConfig, TracingFormat};
pub use types::{
    Mask, MaskStatistics, PixelBuffer, PixelFormat, ProcessingTimings, RemovalFailure,
    RemovalRequest, RemovalResult, RequestId, RequestState,
};

#[cfg(feature = "tracing-init")]
pub use tracing_config::init_library_tracing;

// Re-exported so callers can build a `SchedulingContext` without a direct dependency
pub use tokio_util::sync::CancellationToken;
