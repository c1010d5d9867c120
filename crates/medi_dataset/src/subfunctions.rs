//! Deterministic preprocessing transforms applied after augmentation.

use crate::types::{DatasetError, DatasetResult, ImageTensor};
use ndarray::{ArrayD, IxDyn, SliceInfoElem};

/// A single preprocessing step. Steps run strictly in the order they are supplied.
pub trait Subfunction: Send + Sync {
    fn transform(&self, image: ImageTensor) -> DatasetResult<ImageTensor>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Subfunction for F
where
    F: Fn(ImageTensor) -> DatasetResult<ImageTensor> + Send + Sync,
{
    fn transform(&self, image: ImageTensor) -> DatasetResult<ImageTensor> {
        self(image)
    }
}

/// Clamp intensities into `[min, max]`, e.g. a Hounsfield window for CT.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clip {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl Subfunction for Clip {
    fn transform(&self, mut image: ImageTensor) -> DatasetResult<ImageTensor> {
        let lo = self.min.unwrap_or(f32::NEG_INFINITY);
        let hi = self.max.unwrap_or(f32::INFINITY);
        if lo > hi {
            return Err(DatasetError::Configuration(format!(
                "clip min {lo} exceeds max {hi}"
            )));
        }
        image.mapv_inplace(|v| v.clamp(lo, hi));
        Ok(image)
    }

    fn name(&self) -> &str {
        "clip"
    }
}

/// Pad spatial axes up to `shape` (centered) with a constant value. Larger axes are kept.
#[derive(Debug, Clone)]
pub struct Padding {
    pub shape: Vec<usize>,
    pub value: f32,
}

impl Subfunction for Padding {
    fn transform(&self, image: ImageTensor) -> DatasetResult<ImageTensor> {
        let spatial = image.ndim().saturating_sub(1);
        if self.shape.len() != spatial {
            return Err(DatasetError::Shape(format!(
                "padding shape {:?} does not match spatial rank of {:?}",
                self.shape,
                image.shape()
            )));
        }
        let mut out_shape = image.shape().to_vec();
        let mut offsets = Vec::with_capacity(spatial);
        for (axis, &want) in self.shape.iter().enumerate() {
            let have = out_shape[axis];
            let target = have.max(want);
            offsets.push((target - have) / 2);
            out_shape[axis] = target;
        }
        if out_shape == image.shape() {
            return Ok(image);
        }
        let mut out = ArrayD::from_elem(IxDyn(&out_shape), self.value);
        let mut info: Vec<SliceInfoElem> = offsets
            .iter()
            .zip(image.shape())
            .map(|(&off, &len)| SliceInfoElem::from(off..off + len))
            .collect();
        info.push(SliceInfoElem::from(..));
        out.slice_mut(info.as_slice()).assign(&image);
        Ok(out)
    }

    fn name(&self) -> &str {
        "padding"
    }
}

/// Center-crop spatial axes down to `shape`. Smaller axes are kept.
#[derive(Debug, Clone)]
pub struct Crop {
    pub shape: Vec<usize>,
}

impl Subfunction for Crop {
    fn transform(&self, image: ImageTensor) -> DatasetResult<ImageTensor> {
        let spatial = image.ndim().saturating_sub(1);
        if self.shape.len() != spatial {
            return Err(DatasetError::Shape(format!(
                "crop shape {:?} does not match spatial rank of {:?}",
                self.shape,
                image.shape()
            )));
        }
        let mut info: Vec<SliceInfoElem> = self
            .shape
            .iter()
            .zip(image.shape())
            .map(|(&want, &have)| {
                let keep = want.min(have);
                let start = (have - keep) / 2;
                SliceInfoElem::from(start..start + keep)
            })
            .collect();
        info.push(SliceInfoElem::from(..));
        Ok(image.slice(info.as_slice()).to_owned())
    }

    fn name(&self) -> &str {
        "crop"
    }
}
