//! Test utilities and mock backends
//!
//! Mock implementations of [`InferenceBackend`] and [`SegmentationBackend`]
//! so engine behaviour can be tested without model files or native runtimes.

use crate::{
    error::{BgRemovalError, Result},
    inference::{InferenceBackend, SegmentationBackend},
    models::{ModelInfo, PreprocessingConfig},
    types::{Mask, PixelBuffer},
};
use ndarray::Array4;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Condvar, Mutex,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum MockOutput {
    Constant(f32),
    Radial,
    Fail,
}

/// Mock tensor runtime with a square model of edge `size`
#[derive(Debug)]
pub struct MockTensorBackend {
    output: MockOutput,
    preprocessing_config: PreprocessingConfig,
    model_info: ModelInfo,
    calls: AtomicUsize,
}

impl MockTensorBackend {
    fn with_output(size: u32, output: MockOutput) -> Self {
        let edge = size as usize;
        Self {
            output,
            preprocessing_config: PreprocessingConfig {
                target_size: size,
                normalization_mean: [0.485, 0.456, 0.406],
                normalization_std: [0.229, 0.224, 0.225],
                padding_color: [255, 255, 255],
            },
            model_info: ModelInfo {
                name: "mock-model".to_string(),
                size_bytes: 1024 * 1024,
                input_shape: (1, 3, edge, edge),
            },
            calls: AtomicUsize::new(0),
        }
    }

    /// Every output value is `value`
    pub fn constant(size: u32, value: f32) -> Self {
        Self::with_output(size, MockOutput::Constant(value))
    }

    /// Circular foreground with soft edges, centred in the canvas
    pub fn radial(size: u32) -> Self {
        Self::with_output(size, MockOutput::Radial)
    }

    /// Inference always fails
    pub fn failing(size: u32) -> Self {
        Self::with_output(size, MockOutput::Fail)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn generate_radial(edge: usize) -> Array4<f32> {
        let center = edge as f32 / 2.0;
        let radius = (edge as f32 / 3.0).max(1.0);
        Array4::from_shape_fn((1, 1, edge, edge), |(_, _, y, x)| {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let distance = (dx * dx + dy * dy).sqrt();
            ((radius - distance) / radius).clamp(0.0, 1.0)
        })
    }
}

impl InferenceBackend for MockTensorBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if input.shape().get(1) != Some(&3) {
            return Err(BgRemovalError::inference("Input tensor must be NCHW RGB"));
        }
        let edge = self.preprocessing_config.target_size as usize;
        match self.output {
            MockOutput::Constant(value) => Ok(Array4::from_elem((1, 1, edge, edge), value)),
            MockOutput::Radial => Ok(Self::generate_radial(edge)),
            MockOutput::Fail => Err(BgRemovalError::inference("Mock runtime out of memory")),
        }
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing_config
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model_info
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Returns the same confidence for every pixel
#[derive(Debug)]
pub struct FixedMaskBackend {
    confidence: f32,
    calls: AtomicUsize,
}

impl FixedMaskBackend {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationBackend for FixedMaskBackend {
    fn infer(&self, image: &PixelBuffer) -> Result<Mask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        image.validate()?;
        Ok(Mask::filled(image.width, image.height, self.confidence))
    }

    fn name(&self) -> &str {
        "fixed-mask"
    }
}

/// Confidence of each pixel is its first channel / 255, so every output is
/// traceable to its own input
#[derive(Debug, Default)]
pub struct ContentMaskBackend;

impl SegmentationBackend for ContentMaskBackend {
    fn infer(&self, image: &PixelBuffer) -> Result<Mask> {
        image.validate()?;
        let data = image
            .data
            .chunks_exact(image.format.bytes_per_pixel())
            .map(|pixel| f32::from(pixel.first().copied().unwrap_or(0)) / 255.0)
            .collect();
        Mask::new(image.width, image.height, data)
    }

    fn name(&self) -> &str {
        "content-mask"
    }
}

/// Returns a mask of the wrong size
#[derive(Debug, Default)]
pub struct MismatchedMaskBackend;

impl SegmentationBackend for MismatchedMaskBackend {
    fn infer(&self, image: &PixelBuffer) -> Result<Mask> {
        Ok(Mask::filled(image.width + 1, image.height, 1.0))
    }

    fn name(&self) -> &str {
        "mismatched-mask"
    }
}

/// Panics inside inference
#[derive(Debug, Default)]
pub struct PanickingBackend;

impl SegmentationBackend for PanickingBackend {
    fn infer(&self, _image: &PixelBuffer) -> Result<Mask> {
        panic!("segmentation runtime crashed");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Cancels `token` after the mask is built, so the request is cancelled
/// between segmentation and delivery
#[derive(Debug, Clone, Default)]
pub struct SelfCancellingBackend {
    token: CancellationToken,
    calls: Arc<AtomicUsize>,
}

impl SelfCancellingBackend {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            calls: Arc::default(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationBackend for SelfCancellingBackend {
    fn infer(&self, image: &PixelBuffer) -> Result<Mask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mask = Mask::filled(image.width, image.height, 1.0);
        self.token.cancel();
        Ok(mask)
    }

    fn name(&self) -> &str {
        "self-cancelling"
    }
}

/// Blocks inference until [`GatedBackend::release`] is called
#[derive(Debug, Clone, Default)]
pub struct GatedBackend {
    gate: Arc<(Mutex<bool>, Condvar)>,
    entered: Arc<Notify>,
    calls: Arc<AtomicUsize>,
}

impl GatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once an inference call is blocked on the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        let (lock, condvar) = &*self.gate;
        *lock.lock().unwrap() = true;
        condvar.notify_all();
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationBackend for GatedBackend {
    fn infer(&self, image: &PixelBuffer) -> Result<Mask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        let (lock, condvar) = &*self.gate;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = condvar.wait(open).unwrap();
        }
        Ok(Mask::filled(image.width, image.height, 1.0))
    }

    fn name(&self) -> &str {
        "gated"
    }
}
