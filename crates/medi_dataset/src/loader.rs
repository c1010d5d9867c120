//! Image loader capability and the default image-file loader.

use crate::types::{DatasetError, DatasetResult, ImageTensor, LoaderOptions};
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};

/// Everything a loader needs to fetch one sample.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub sample: &'a str,
    pub image_dir: &'a Path,
    /// Extension appended to the sample identifier, if the identifier does not carry one.
    pub image_format: Option<&'a str>,
    pub grayscale: bool,
    pub options: &'a LoaderOptions,
}

impl LoadRequest<'_> {
    pub fn path(&self) -> PathBuf {
        image_path(self.image_dir, self.sample, self.image_format)
    }
}

/// Resolve the on-disk file for a sample identifier.
pub fn image_path(image_dir: &Path, sample: &str, image_format: Option<&str>) -> PathBuf {
    match image_format {
        Some(fmt) => image_dir.join(format!("{sample}.{fmt}")),
        None => image_dir.join(sample),
    }
}

/// Loads one sample into a channels-last tensor. Missing or corrupt files are errors.
pub trait ImageLoader: Send + Sync {
    fn load(&self, request: &LoadRequest<'_>) -> DatasetResult<ImageTensor>;
}

/// Loads 2D images through the `image` crate as `(H, W, 3)` or `(H, W, 1)` with 0..255 intensities.
/// Loader options are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileLoader;

impl ImageLoader for ImageFileLoader {
    fn load(&self, request: &LoadRequest<'_>) -> DatasetResult<ImageTensor> {
        let path = request.path();
        if !path.exists() {
            return Err(DatasetError::MissingImage {
                sample: request.sample.to_string(),
                path,
            });
        }
        let img = image::open(&path).map_err(|e| DatasetError::Image {
            path: path.clone(),
            source: e,
        })?;
        let (buf, w, h, c) = if request.grayscale {
            let gray = img.to_luma8();
            let (w, h) = gray.dimensions();
            (gray.into_raw(), w, h, 1)
        } else {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            (rgb.into_raw(), w, h, 3)
        };
        let data: Vec<f32> = buf.into_iter().map(f32::from).collect();
        ArrayD::from_shape_vec(IxDyn(&[h as usize, w as usize, c]), data)
            .map_err(|e| DatasetError::Shape(format!("{}: {e}", path.display())))
    }
}
