//! Core types, error definitions, and data structures for medi_dataset.

use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Image tensor in channels-last layout: `(H, W, C)` for images, `(H, W, D, C)` for volumes.
pub type ImageTensor = ArrayD<f32>;

/// Free-form passthrough configuration handed to the image loader.
pub type LoaderOptions = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image does not exist or is not accessible for sample \"{sample}\": {path}")]
    MissingImage { sample: String, path: PathBuf },
    #[error("unknown image format in {dir}")]
    UnknownImageFormat { dir: PathBuf },
    #[error("malformed data at {path}: {msg}")]
    DataFormat { path: PathBuf, msg: String },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("shape mismatch: {0}")]
    Shape(String),
}

impl DatasetError {
    pub(crate) fn data_format(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        DatasetError::DataFormat {
            path: path.into(),
            msg: msg.into(),
        }
    }
}

/// Spatial dimensionality of the data an augmentation policy operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dims {
    /// 2D images, tensors of rank 3 `(H, W, C)`.
    Image,
    /// 3D volumes, tensors of rank 4 `(H, W, D, C)`.
    Volume,
}

impl Dims {
    /// Rank of a single (unbatched) tensor.
    pub fn rank(&self) -> usize {
        match self {
            Dims::Image => 3,
            Dims::Volume => 4,
        }
    }

    /// Number of spatial axes.
    pub fn spatial(&self) -> usize {
        self.rank() - 1
    }

    pub fn from_rank(rank: usize) -> Option<Self> {
        match rank {
            3 => Some(Dims::Image),
            4 => Some(Dims::Volume),
            _ => None,
        }
    }
}

/// One emitted batch. Rows follow the generator's sample sequence order.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Batch axis first, then the item axes.
    pub images: ArrayD<f32>,
    /// Position of each row in the generator's sample sequence.
    pub positions: Vec<usize>,
    /// One-hot labels, present only when the generator was given labels.
    pub labels: Option<Array2<f32>>,
    /// Per-sample weights, present only when the generator was given weights.
    pub weights: Option<Array1<f32>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Parsed JSON dataset descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonDataset {
    pub samples: Vec<String>,
    /// One-hot encoded labels `(samples, classes)`; `None` for inference descriptors.
    #[serde(skip)]
    pub labels: Option<Array2<f32>>,
    pub class_n: Option<usize>,
    pub class_names: Option<Vec<String>>,
    /// Extension to append to sample identifiers; `None` when identifiers already carry it.
    pub image_format: Option<String>,
}

impl JsonDataset {
    /// Per-class sample counts, aligned with `class_names`.
    pub fn class_counts(&self) -> Option<Vec<usize>> {
        let labels = self.labels.as_ref()?;
        Some(
            labels
                .columns()
                .into_iter()
                .map(|col| col.iter().filter(|v| **v > 0.5).count())
                .collect(),
        )
    }
}
