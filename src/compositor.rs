//! Mask compositing
//!
//! Turns a foreground-confidence [`Mask`] and its source [`PixelBuffer`] into
//! a new buffer whose alpha channel carries the cutout.
//!
//! Blending rule: `output_alpha = round(original_alpha * confidence)`, colour
//! channels untouched. Partial confidence yields partial transparency, which
//! keeps hair and other soft edges. With [`CompositorConfig::threshold`] set
//! to `t` the rule becomes a hard cutoff: confidence below `t` gives alpha 0,
//! anything else keeps the original alpha.

use crate::{
    error::{BgRemovalError, Result},
    types::{Mask, PixelBuffer},
};
use serde::{Deserialize, Serialize};

/// Compositing options
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositorConfig {
    /// `None`: soft blend everywhere. `Some(t)`: hard cutoff at confidence `t`.
    pub threshold: Option<f32>,
}

impl CompositorConfig {
    /// Soft edges
    #[must_use]
    pub fn soft() -> Self {
        Self { threshold: None }
    }

    /// Hard cutoff at `threshold`
    #[must_use]
    pub fn hard(threshold: f32) -> Self {
        Self {
            threshold: Some(threshold),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.threshold {
            Some(t) if !(0.0..=1.0).contains(&t) => Err(BgRemovalError::config_value_error(
                "compositor threshold",
                t,
                "0.0-1.0",
            )),
            _ => Ok(()),
        }
    }
}

/// Applies segmentation masks to images
#[derive(Debug, Clone, Default)]
pub struct MaskCompositor {
    config: CompositorConfig,
}

impl MaskCompositor {
    /// Create a compositor, rejecting thresholds outside `[0, 1]`
    pub fn new(config: CompositorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Composite `mask` onto `image` into a newly allocated buffer
    ///
    /// RGB input gains an alpha channel and comes back as RGBA; RGBA and BGRA
    /// keep their layout.
    ///
    /// # Errors
    /// - `InvariantViolation` when mask and image dimensions differ or the
    ///   image buffer is malformed. The engine validates input before
    ///   segmentation, so either case is an engine bug.
    pub fn apply(&self, image: &PixelBuffer, mask: &Mask) -> Result<PixelBuffer> {
        if mask.dimensions() != image.dimensions() {
            let (mask_width, mask_height) = mask.dimensions();
            return Err(BgRemovalError::invariant(format!(
                "mask is {}x{} but image is {}x{}",
                mask_width, mask_height, image.width, image.height
            )));
        }
        image.validate().map_err(|e| {
            BgRemovalError::invariant(format!("compositing a malformed buffer: {}", e))
        })?;

        let in_bpp = image.format.bytes_per_pixel();
        let out_format = image.format.with_alpha();
        let mut data = Vec::with_capacity(image.pixel_count() * out_format.bytes_per_pixel());

        for (pixel, &confidence) in image.data.chunks_exact(in_bpp).zip(mask.data()) {
            match image.format.alpha_offset() {
                Some(offset) => {
                    let (colour, rest) = pixel.split_at(offset);
                    let alpha = rest.first().copied().unwrap_or(u8::MAX);
                    data.extend_from_slice(colour);
                    data.push(self.blend(alpha, confidence));
                },
                None => {
                    data.extend_from_slice(pixel);
                    data.push(self.blend(u8::MAX, confidence));
                },
            }
        }

        PixelBuffer::new(image.width, image.height, out_format, data)
            .map_err(|e| BgRemovalError::invariant(format!("composited buffer malformed: {}", e)))
    }

    fn blend(&self, alpha: u8, confidence: f32) -> u8 {
        match self.config.threshold {
            Some(t) if confidence < t => 0,
            Some(_) => alpha,
            None => (f32::from(alpha) * confidence).round() as u8,
        }
    }
}
