//! Intensity standardization conventions expected by the different network families.

use crate::types::{DatasetError, DatasetResult, ImageTensor};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ImageNet channel means in BGR order, on the 0..255 scale.
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
/// ImageNet channel statistics in RGB order, on the 0..1 scale.
const TORCH_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandardizeMode {
    /// Zero mean, unit variance per image.
    #[serde(rename = "z-score")]
    ZScore,
    /// Scale to [0, 1].
    #[serde(rename = "minmax")]
    MinMax,
    /// Scale to [0, 255].
    #[serde(rename = "grayscale")]
    Grayscale,
    /// Scale 0..255 to [-1, 1].
    #[serde(rename = "tf")]
    Tf,
    /// RGB to BGR, then subtract ImageNet channel means.
    #[serde(rename = "caffe")]
    Caffe,
    /// Scale to [0, 1], then normalize with ImageNet mean/std.
    #[serde(rename = "torch")]
    Torch,
}

impl StandardizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StandardizeMode::ZScore => "z-score",
            StandardizeMode::MinMax => "minmax",
            StandardizeMode::Grayscale => "grayscale",
            StandardizeMode::Tf => "tf",
            StandardizeMode::Caffe => "caffe",
            StandardizeMode::Torch => "torch",
        }
    }

    pub fn apply(&self, mut image: ImageTensor) -> DatasetResult<ImageTensor> {
        match self {
            StandardizeMode::ZScore => {
                let n = image.len().max(1) as f32;
                let mean = image.sum() / n;
                let var = image.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
                let std = var.sqrt();
                if std > f32::EPSILON {
                    image.mapv_inplace(|v| (v - mean) / std);
                } else {
                    image.mapv_inplace(|v| v - mean);
                }
            }
            StandardizeMode::MinMax => rescale(&mut image, 0.0, 1.0),
            StandardizeMode::Grayscale => rescale(&mut image, 0.0, 255.0),
            StandardizeMode::Tf => image.mapv_inplace(|v| v / 127.5 - 1.0),
            StandardizeMode::Caffe => {
                let last = require_rgb(&image, self)?;
                image.invert_axis(Axis(last));
                for (c, mut channel) in image.axis_iter_mut(Axis(last)).enumerate() {
                    let mean = CAFFE_MEAN_BGR[c];
                    channel.mapv_inplace(|v| v - mean);
                }
                image = image.as_standard_layout().into_owned();
            }
            StandardizeMode::Torch => {
                let last = require_rgb(&image, self)?;
                for (c, mut channel) in image.axis_iter_mut(Axis(last)).enumerate() {
                    let (mean, std) = (TORCH_MEAN[c], TORCH_STD[c]);
                    channel.mapv_inplace(|v| (v / 255.0 - mean) / std);
                }
            }
        }
        Ok(image)
    }
}

impl fmt::Display for StandardizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StandardizeMode {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "z-score" | "zscore" => Ok(StandardizeMode::ZScore),
            "minmax" => Ok(StandardizeMode::MinMax),
            "grayscale" => Ok(StandardizeMode::Grayscale),
            "tf" => Ok(StandardizeMode::Tf),
            "caffe" => Ok(StandardizeMode::Caffe),
            "torch" => Ok(StandardizeMode::Torch),
            other => Err(DatasetError::Configuration(format!(
                "unknown standardize mode \"{other}\""
            ))),
        }
    }
}

fn rescale(image: &mut ImageTensor, lo: f32, hi: f32) {
    let min = image.iter().copied().fold(f32::INFINITY, f32::min);
    let max = image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        image.fill(lo);
        return;
    }
    image.mapv_inplace(|v| lo + (v - min) / range * (hi - lo));
}

fn require_rgb(image: &ImageTensor, mode: &StandardizeMode) -> DatasetResult<usize> {
    let last = image.ndim().saturating_sub(1);
    if image.ndim() == 0 || image.shape()[last] != 3 {
        return Err(DatasetError::Shape(format!(
            "standardize mode {mode} requires 3 channels, got shape {:?}",
            image.shape()
        )));
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn ramp(shape: &[usize]) -> ImageTensor {
        let n: usize = shape.iter().product();
        ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn zscore_has_zero_mean_unit_variance() {
        let out = StandardizeMode::ZScore.apply(ramp(&[4, 4, 3])).unwrap();
        let n = out.len() as f32;
        let mean = out.sum() / n;
        let var = out.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-4);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn minmax_spans_unit_range() {
        let out = StandardizeMode::MinMax.apply(ramp(&[2, 2, 1])).unwrap();
        assert_eq!(out.iter().copied().fold(f32::INFINITY, f32::min), 0.0);
        assert_eq!(out.iter().copied().fold(f32::NEG_INFINITY, f32::max), 1.0);
    }

    #[test]
    fn caffe_swaps_channels_and_subtracts_means() {
        let mut img = ArrayD::zeros(IxDyn(&[1, 1, 3]));
        img[[0, 0, 0]] = 10.0; // R
        img[[0, 0, 2]] = 200.0; // B
        let out = StandardizeMode::Caffe.apply(img).unwrap();
        assert!((out[[0, 0, 0]] - (200.0 - 103.939)).abs() < 1e-3);
        assert!((out[[0, 0, 2]] - (10.0 - 123.68)).abs() < 1e-3);
    }

    #[test]
    fn torch_requires_three_channels() {
        let err = StandardizeMode::Torch.apply(ramp(&[2, 2, 1])).unwrap_err();
        assert!(matches!(err, DatasetError::Shape(_)));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert_eq!("z-score".parse::<StandardizeMode>().unwrap(), StandardizeMode::ZScore);
        assert_eq!("TF".parse::<StandardizeMode>().unwrap(), StandardizeMode::Tf);
        assert!(matches!(
            "bogus".parse::<StandardizeMode>(),
            Err(DatasetError::Configuration(_))
        ));
    }
}
