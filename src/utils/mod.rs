//! Image preprocessing and tensor conversion helpers

pub mod preprocessing;

pub use preprocessing::{ImagePreprocessor, Letterbox};
