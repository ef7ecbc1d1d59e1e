//! Segmentation backend implementations
//!
//! - ONNX Runtime backend (native runtime, GPU acceleration)
//! - Tract backend (pure Rust, no external dependencies)
//! - Unavailable backend (builds without segmentation capability)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod unavailable;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

pub use self::unavailable::UnavailableBackend;
