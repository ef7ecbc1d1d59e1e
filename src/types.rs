//! Core types for background removal operations

use crate::error::{BgRemovalError, ErrorKind, Result};
use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Memory layout of a [`PixelBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit red, green, blue; implicitly opaque
    Rgb8,
    /// 8-bit red, green, blue, alpha
    Rgba8,
    /// 8-bit blue, green, red, alpha (common platform bitmap layout)
    Bgra8,
}

impl PixelFormat {
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }

    #[must_use]
    pub fn has_alpha(self) -> bool {
        !matches!(self, Self::Rgb8)
    }

    /// Byte offset of the alpha channel within a pixel, if any
    #[must_use]
    pub fn alpha_offset(self) -> Option<usize> {
        match self {
            Self::Rgb8 => None,
            Self::Rgba8 | Self::Bgra8 => Some(3),
        }
    }

    /// Format produced when compositing a buffer of this format
    #[must_use]
    pub fn with_alpha(self) -> Self {
        match self {
            Self::Rgb8 => Self::Rgba8,
            other => other,
        }
    }

    /// Read a pixel as `[r, g, b]`
    #[must_use]
    pub fn to_rgb(self, pixel: &[u8]) -> [u8; 3] {
        match (self, pixel) {
            (Self::Rgb8 | Self::Rgba8, [r, g, b, ..]) => [*r, *g, *b],
            (Self::Bgra8, [b, g, r, ..]) => [*r, *g, *b],
            _ => [0, 0, 0],
        }
    }
}

/// Decoded image handed to and returned by the engine
///
/// Fields are public so callers can hand over buffers they already own;
/// [`PixelBuffer::validate`] is the single authority on well-formedness and
/// the engine runs it on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major pixel data without row padding
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a buffer, checking that `data` matches the dimensions
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let buffer = Self {
            width,
            height,
            format,
            data,
        };
        buffer.validate()?;
        Ok(buffer)
    }

    /// Create a buffer where every pixel has the same value
    pub fn from_pixel(width: u32, height: u32, format: PixelFormat, pixel: &[u8]) -> Result<Self> {
        if pixel.len() != format.bytes_per_pixel() {
            return Err(BgRemovalError::invalid_input(format!(
                "{:?} pixels are {} bytes, got {}",
                format,
                format.bytes_per_pixel(),
                pixel.len()
            )));
        }
        let len = Self::expected_len(width, height, format)?;
        let data = pixel.iter().copied().cycle().take(len).collect();
        Self::new(width, height, format, data)
    }

    fn expected_len(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| {
                BgRemovalError::invalid_input(format!("{}x{} image is too large", width, height))
            })
    }

    /// Check the buffer invariants: non-zero dimensions and a data length of
    /// exactly `width * height * bytes_per_pixel`
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(BgRemovalError::invalid_input(format!(
                "image dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        let expected = Self::expected_len(self.width, self.height, self.format)?;
        if self.data.len() != expected {
            return Err(BgRemovalError::invalid_input(format!(
                "{}x{} {:?} image needs {} bytes, buffer holds {}",
                self.width,
                self.height,
                self.format,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes of the pixel at `(x, y)`
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        self.data.get(start..start + bpp)
    }

    /// Alpha of the pixel at `(x, y)`; 255 for formats without alpha
    #[must_use]
    pub fn alpha(&self, x: u32, y: u32) -> Option<u8> {
        let pixel = self.pixel(x, y)?;
        match self.format.alpha_offset() {
            Some(offset) => pixel.get(offset).copied(),
            None => Some(u8::MAX),
        }
    }

    /// Iterator over the alpha channel in row-major order
    pub fn alpha_channel(&self) -> impl Iterator<Item = u8> + '_ {
        let offset = self.format.alpha_offset();
        self.data
            .chunks_exact(self.format.bytes_per_pixel())
            .map(move |pixel| offset.and_then(|o| pixel.get(o).copied()).unwrap_or(u8::MAX))
    }

    /// Copy into an RGB image, dropping alpha
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        self.validate()?;
        let data = self
            .data
            .chunks_exact(self.format.bytes_per_pixel())
            .flat_map(|pixel| self.format.to_rgb(pixel))
            .collect();
        ImageBuffer::from_raw(self.width, self.height, data)
            .ok_or_else(|| BgRemovalError::invalid_input("Failed to create RGB image from buffer"))
    }

    /// Copy into an RGBA image
    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        self.validate()?;
        let offset = self.format.alpha_offset();
        let data = self
            .data
            .chunks_exact(self.format.bytes_per_pixel())
            .flat_map(|pixel| {
                let [r, g, b] = self.format.to_rgb(pixel);
                let a = offset
                    .and_then(|o| pixel.get(o).copied())
                    .unwrap_or(u8::MAX);
                [r, g, b, a]
            })
            .collect();
        ImageBuffer::from_raw(self.width, self.height, data)
            .ok_or_else(|| BgRemovalError::invalid_input("Failed to create RGBA image from buffer"))
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            data: image.into_raw(),
        }
    }
}

impl From<RgbImage> for PixelBuffer {
    fn from(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            data: image.into_raw(),
        }
    }
}

impl From<DynamicImage> for PixelBuffer {
    fn from(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageRgb8(rgb) => rgb.into(),
            other => other.to_rgba8().into(),
        }
    }
}

/// Per-pixel foreground confidence, 1.0 = foreground
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Mask {
    /// Create a mask from row-major confidences
    ///
    /// Values are clamped into `[0.0, 1.0]`; NaN becomes background.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(BgRemovalError::invariant(format!(
                "{}x{} mask needs {} values, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        let data = data
            .into_iter()
            .map(|value| if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) })
            .collect();
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Mask with the same confidence everywhere
    #[must_use]
    pub fn filled(width: u32, height: u32, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            width,
            height,
            data: vec![confidence; width as usize * height as usize],
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Quantize to an 8-bit grayscale image for inspection
    #[must_use]
    pub fn to_luma_image(&self) -> GrayImage {
        ImageBuffer::from_fn(self.width, self.height, |x, y| {
            let value = self.get(x, y).unwrap_or(0.0);
            Luma([(value * 255.0).round() as u8])
        })
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&x| x >= 0.5).count();
        let background_pixels = total_pixels - foreground_pixels;
        let total = total_pixels.max(1) as f32;

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels,
            foreground_ratio: foreground_pixels as f32 / total,
            background_ratio: background_pixels as f32 / total,
        }
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
    pub background_ratio: f32,
}

/// Correlation token for a removal request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Random v4 UUID based id
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One image submitted for background removal
#[derive(Debug, Clone)]
pub struct RemovalRequest {
    pub id: RequestId,
    /// Shared read-only; the engine never writes to it
    pub image: Arc<PixelBuffer>,
}

impl RemovalRequest {
    /// Request with a freshly generated id
    pub fn new(image: impl Into<Arc<PixelBuffer>>) -> Self {
        Self::with_id(RequestId::new(), image)
    }

    pub fn with_id(id: impl Into<RequestId>, image: impl Into<Arc<PixelBuffer>>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
        }
    }
}

/// Failure half of a [`RemovalResult`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemovalFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<BgRemovalError> for RemovalFailure {
    fn from(error: BgRemovalError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Timing breakdown for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Segmentation backend, including model pre/postprocessing
    pub segmentation_ms: u64,
    /// Mask compositing
    pub compositing_ms: u64,
    /// Submission to delivery
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Get timing summary for display
    #[must_use]
    pub fn summary(&self) -> String {
        let other_ms = self
            .total_ms
            .saturating_sub(self.segmentation_ms + self.compositing_ms);
        format!(
            "Total: {}ms | Segmentation: {}ms | Compositing: {}ms | Other: {}ms",
            self.total_ms, self.segmentation_ms, self.compositing_ms, other_ms
        )
    }
}

/// Outcome delivered to the caller's callback, exactly once per request
#[derive(Debug, Clone)]
pub struct RemovalResult {
    pub request_id: RequestId,
    pub outcome: std::result::Result<PixelBuffer, RemovalFailure>,
    pub timings: ProcessingTimings,
    pub completed_at: DateTime<Utc>,
}

impl RemovalResult {
    #[must_use]
    pub fn succeeded(
        request_id: RequestId,
        image: PixelBuffer,
        timings: ProcessingTimings,
    ) -> Self {
        Self {
            request_id,
            outcome: Ok(image),
            timings,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(
        request_id: RequestId,
        failure: impl Into<RemovalFailure>,
        timings: ProcessingTimings,
    ) -> Self {
        Self {
            request_id,
            outcome: Err(failure.into()),
            timings,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The composited image, if the request succeeded
    #[must_use]
    pub fn image(&self) -> Option<&PixelBuffer> {
        self.outcome.as_ref().ok()
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().err().map(|failure| failure.kind)
    }

    /// Take the composited image, or the failure
    pub fn into_image(self) -> std::result::Result<PixelBuffer, RemovalFailure> {
        self.outcome
    }
}

/// Lifecycle of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Pending,
    Running,
    Succeeded,
    Failed(ErrorKind),
    /// Cancelled before delivery; the callback did not fire
    Cancelled,
}

impl RequestState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Cancelled)
    }

    /// Move to `next`, refusing to leave a terminal state or go backwards
    pub fn advance(&mut self, next: RequestState) -> Result<()> {
        let allowed = match (*self, next) {
            (Self::Pending, Self::Running | Self::Failed(_) | Self::Cancelled) => true,
            (Self::Running, Self::Succeeded | Self::Failed(_) | Self::Cancelled) => true,
            _ => false,
        };
        if !allowed {
            return Err(BgRemovalError::invariant(format!(
                "illegal request transition {:?} -> {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_validation() {
        assert!(PixelBuffer::new(2, 2, PixelFormat::Rgba8, vec![0; 16]).is_ok());
        assert!(PixelBuffer::new(2, 2, PixelFormat::Rgb8, vec![0; 12]).is_ok());

        let err = PixelBuffer::new(2, 2, PixelFormat::Rgba8, vec![0; 15]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = PixelBuffer::new(0, 4, PixelFormat::Rgb8, vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let tampered = PixelBuffer {
            width: 3,
            height: 1,
            format: PixelFormat::Bgra8,
            data: vec![0; 4],
        };
        assert!(tampered.validate().is_err());
    }

    #[test]
    fn test_from_pixel_and_accessors() {
        let buffer = PixelBuffer::from_pixel(3, 2, PixelFormat::Bgra8, &[10, 20, 30, 40]).unwrap();
        assert_eq!(buffer.data.len(), 24);
        assert_eq!(buffer.pixel(2, 1), Some(&[10, 20, 30, 40][..]));
        assert_eq!(buffer.pixel(3, 0), None);
        assert_eq!(buffer.alpha(0, 0), Some(40));

        let rgba = buffer.to_rgba_image().unwrap();
        assert_eq!(rgba.get_pixel(1, 1).0, [30, 20, 10, 40]);

        let rgb = PixelBuffer::from_pixel(1, 1, PixelFormat::Rgb8, &[1, 2, 3]).unwrap();
        assert_eq!(rgb.alpha(0, 0), Some(255));
        assert!(PixelBuffer::from_pixel(1, 1, PixelFormat::Rgb8, &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_image_conversions() {
        let rgba = RgbaImage::from_pixel(4, 3, image::Rgba([1, 2, 3, 4]));
        let buffer = PixelBuffer::from(rgba);
        assert_eq!(buffer.format, PixelFormat::Rgba8);
        assert_eq!(buffer.dimensions(), (4, 3));
        assert!(buffer.alpha_channel().all(|a| a == 4));

        let dynamic = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        assert_eq!(PixelBuffer::from(dynamic).format, PixelFormat::Rgb8);

        let dynamic = DynamicImage::ImageLuma8(GrayImage::new(2, 2));
        assert_eq!(PixelBuffer::from(dynamic).format, PixelFormat::Rgba8);
    }

    #[test]
    fn test_mask_clamps_and_checks_length() {
        let mask = Mask::new(2, 1, vec![1.5, f32::NAN]).unwrap();
        assert_eq!(mask.data(), &[1.0, 0.0]);

        let err = Mask::new(2, 2, vec![0.5; 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[test]
    fn test_mask_statistics_and_luma() {
        let mask = Mask::new(2, 2, vec![1.0, 0.75, 0.25, 0.0]).unwrap();
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.foreground_pixels, 2);
        assert!((stats.foreground_ratio - 0.5).abs() < f32::EPSILON);

        let luma = mask.to_luma_image();
        assert_eq!(luma.get_pixel(0, 0).0, [255]);
        assert_eq!(luma.get_pixel(1, 1).0, [0]);
    }

    #[test]
    fn test_request_state_transitions() {
        let mut state = RequestState::Pending;
        state.advance(RequestState::Running).unwrap();
        state.advance(RequestState::Succeeded).unwrap();
        assert!(state.is_terminal());

        assert!(state.advance(RequestState::Running).is_err());
        assert!(state
            .advance(RequestState::Failed(ErrorKind::BackendFailure))
            .is_err());
        assert_eq!(state, RequestState::Succeeded);

        let mut state = RequestState::Pending;
        assert!(state.advance(RequestState::Succeeded).is_err());
    }

    #[test]
    fn test_removal_result_accessors() {
        let image = PixelBuffer::from_pixel(1, 1, PixelFormat::Rgba8, &[0, 0, 0, 0]).unwrap();
        let ok = RemovalResult::succeeded("a".into(), image, ProcessingTimings::default());
        assert!(ok.is_success());
        assert!(ok.image().is_some());
        assert_eq!(ok.error_kind(), None);

        let failed = RemovalResult::failed(
            "b".into(),
            BgRemovalError::unsupported("no segmentation"),
            ProcessingTimings::default(),
        );
        assert_eq!(failed.error_kind(), Some(ErrorKind::UnsupportedOperation));
        assert_eq!(failed.request_id.as_str(), "b");
        assert!(failed.into_image().is_err());
    }
}
