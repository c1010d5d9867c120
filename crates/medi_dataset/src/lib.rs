//! Dataset loading, augmentation, and batch generation for medical image classification.
//!
//! This crate provides utilities for:
//! - Parsing JSON dataset descriptors and checking image availability
//! - Loading images from disk through a pluggable loader
//! - Stochastic 2D/3D augmentation policies
//! - Preprocessing subfunctions and intensity standardization
//! - Order-preserving batch generation with an optional worker pool

pub mod aug;
pub mod batch;
pub mod json;
pub mod loader;
pub mod preprocess;
pub mod standardize;
pub mod subfunctions;
pub mod types;

pub use aug::{AugmentationParams, AugmentationPolicy, AugmentationPolicyBuilder};
pub use batch::{DataGenerator, DataGeneratorBuilder, GeneratorConfig};
pub use json::{json_loader, ALLOWED_IMAGE_FORMATS};
pub use loader::{image_path, ImageFileLoader, ImageLoader, LoadRequest};
pub use standardize::StandardizeMode;
pub use subfunctions::{Clip, Crop, Padding, Subfunction};
pub use types::*;
