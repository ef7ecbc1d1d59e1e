//! Model input preparation and output mapping
//!
//! Images are letterboxed into the model's square input: resized with
//! aspect ratio preserved (`FilterType::Triangle`), centred on a padding
//! colour, then normalised into an NCHW tensor. Model output is mapped back
//! through the inverse letterbox transform to the exact source dimensions.
//!
//! Mask interpolation: each source pixel centre `(x + 0.5, y + 0.5)` is
//! projected into model-output coordinates and sampled bilinearly from the
//! four surrounding output values (clamped at the edges). The result is
//! clamped to `[0, 1]`.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
    types::{Mask, PixelBuffer},
};
use image::{imageops::FilterType, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Geometry of one letterbox operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source image dimensions
    pub original: (u32, u32),
    /// Square canvas edge
    pub target_size: u32,
    /// Resized image dimensions inside the canvas
    pub scaled: (u32, u32),
    /// Top-left corner of the resized image in the canvas
    pub offset: (u32, u32),
}

impl Letterbox {
    /// Compute the aspect-preserving fit of `original` into a
    /// `target_size` square
    #[must_use]
    pub fn new(original: (u32, u32), target_size: u32) -> Self {
        let (orig_width, orig_height) = original;
        let target_size_f32 = target_size as f32;
        let scale = (target_size_f32 / orig_width.max(1) as f32)
            .min(target_size_f32 / orig_height.max(1) as f32);

        let fit = |edge: u32| ((edge as f32 * scale).round() as u32).clamp(1, target_size.max(1));
        let scaled = (fit(orig_width), fit(orig_height));
        let offset = (
            (target_size.saturating_sub(scaled.0)) / 2,
            (target_size.saturating_sub(scaled.1)) / 2,
        );

        Self {
            original,
            target_size,
            scaled,
            offset,
        }
    }

    /// Map a source pixel centre into canvas coordinates
    fn project(&self, x: u32, y: u32) -> (f32, f32) {
        let sx = self.scaled.0 as f32 / self.original.0.max(1) as f32;
        let sy = self.scaled.1 as f32 / self.original.1.max(1) as f32;
        (
            (x as f32 + 0.5) * sx + self.offset.0 as f32,
            (y as f32 + 0.5) * sy + self.offset.1 as f32,
        )
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox and normalise `image` for inference
    ///
    /// # Returns
    /// * The `1 x 3 x target x target` tensor and the letterbox geometry
    ///   needed to map the model output back
    ///
    /// # Errors
    /// * `InvalidInput` for malformed buffers
    /// * `InvalidConfig` for unusable preprocessing parameters
    pub fn preprocess_for_inference(
        image: &PixelBuffer,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        preprocessing_config.validate()?;
        let rgb_image = image.to_rgb_image()?;
        let target_size = preprocessing_config.target_size;
        let letterbox = Letterbox::new(rgb_image.dimensions(), target_size);

        let resized = image::imageops::resize(
            &rgb_image,
            letterbox.scaled.0,
            letterbox.scaled.1,
            FilterType::Triangle,
        );

        let padding = preprocessing_config.padding_color;
        let mut canvas = ImageBuffer::from_pixel(target_size, target_size, image::Rgb(padding));
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset.0),
            i64::from(letterbox.offset.1),
        );

        let tensor = Self::canvas_to_tensor(&canvas, preprocessing_config, target_size as usize);
        Ok((tensor, letterbox))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(
        canvas: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
        target_size: usize,
    ) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, target_size, target_size));
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] =
                        (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
                }
            }
        }

        tensor
    }

    /// Map a `1 x 1 x H x W` model output back onto the source image
    ///
    /// # Errors
    /// * `Inference` when the model output has an unexpected shape
    pub fn tensor_to_mask(tensor: &Array4<f32>, letterbox: &Letterbox) -> Result<Mask> {
        let shape = tensor.shape();
        let (batch, channels, out_height, out_width) = match *shape {
            [b, c, h, w] => (b, c, h, w),
            _ => return Err(BgRemovalError::inference("Invalid output tensor shape")),
        };
        if batch != 1 || channels != 1 || out_height == 0 || out_width == 0 {
            return Err(BgRemovalError::inference(format!(
                "Expected a 1x1xHxW output tensor, got {:?}",
                shape
            )));
        }

        let target = letterbox.target_size.max(1) as f32;
        let ratio_x = out_width as f32 / target;
        let ratio_y = out_height as f32 / target;
        let (width, height) = letterbox.original;

        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let (cx, cy) = letterbox.project(x, y);
                let value = Self::sample_bilinear(
                    tensor,
                    cx * ratio_x - 0.5,
                    cy * ratio_y - 0.5,
                    (out_width, out_height),
                );
                data.push(value);
            }
        }

        Mask::new(width, height, data)
    }

    /// Bilinear sample of channel 0 at continuous output coordinates
    fn sample_bilinear(tensor: &Array4<f32>, tx: f32, ty: f32, size: (usize, usize)) -> f32 {
        let (out_width, out_height) = size;
        let clamp_axis = |t: f32, len: usize| -> (usize, usize, f32) {
            let max = (len - 1) as f32;
            let t = t.clamp(0.0, max);
            let lo = t.floor();
            let i0 = lo as usize;
            let i1 = (i0 + 1).min(len - 1);
            (i0, i1, t - lo)
        };
        let (x0, x1, fx) = clamp_axis(tx, out_width);
        let (y0, y1, fy) = clamp_axis(ty, out_height);

        let at = |x: usize, y: usize| tensor.get([0, 0, y, x]).copied().unwrap_or(0.0);
        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

        let top = lerp(at(x0, y0), at(x1, y0), fx);
        let bottom = lerp(at(x0, y1), at(x1, y1), fx);
        lerp(top, bottom, fy).clamp(0.0, 1.0)
    }
}
