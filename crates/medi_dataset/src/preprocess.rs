//! Shape-level preprocessing shared by the augmentation and batching stages.

use crate::types::{DatasetError, DatasetResult, ImageTensor};
use ndarray::{concatenate, ArrayD, Axis, IxDyn, Zip};

/// ITU-R 601 luma weights.
const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

/// Resize the spatial axes of a channels-last tensor with linear interpolation.
///
/// `target` holds one length per spatial axis (everything but the trailing channel axis).
pub fn resize(image: &ImageTensor, target: &[usize]) -> DatasetResult<ImageTensor> {
    let spatial = image.ndim().saturating_sub(1);
    if target.len() != spatial {
        return Err(DatasetError::Shape(format!(
            "resize target {:?} does not match spatial rank of shape {:?}",
            target,
            image.shape()
        )));
    }
    let mut out = image.clone();
    for (axis, &len) in target.iter().enumerate() {
        out = resize_axis(&out, axis, len)?;
    }
    Ok(out)
}

fn resize_axis(image: &ImageTensor, axis: usize, new_len: usize) -> DatasetResult<ImageTensor> {
    let old_len = image.shape()[axis];
    if old_len == new_len {
        return Ok(image.clone());
    }
    if old_len == 0 || new_len == 0 {
        return Err(DatasetError::Shape(format!(
            "cannot resize axis {axis} from {old_len} to {new_len}"
        )));
    }
    let mut shape = image.shape().to_vec();
    shape[axis] = new_len;
    let mut out = ArrayD::<f32>::zeros(IxDyn(&shape));
    let scale = old_len as f32 / new_len as f32;
    let last = (old_len - 1) as f32;
    for i in 0..new_len {
        // Half-pixel centers, edges clamped.
        let src = ((i as f32 + 0.5) * scale - 0.5).clamp(0.0, last);
        let i0 = src.floor() as usize;
        let i1 = (i0 + 1).min(old_len - 1);
        let t = src - i0 as f32;
        let a = image.index_axis(Axis(axis), i0);
        let b = image.index_axis(Axis(axis), i1);
        Zip::from(out.index_axis_mut(Axis(axis), i))
            .and(&a)
            .and(&b)
            .for_each(|dst, &x, &y| *dst = x * (1.0 - t) + y * t);
    }
    Ok(out)
}

/// Convert to one channel (`grayscale`) or three channels.
///
/// Single-channel input is replicated when color output is requested; other
/// channel counts pass through untouched unless grayscale is requested.
pub fn to_channels(image: ImageTensor, grayscale: bool) -> DatasetResult<ImageTensor> {
    if image.ndim() == 0 {
        return Err(DatasetError::Shape("scalar image has no channel axis".into()));
    }
    let last = image.ndim() - 1;
    let channels = image.shape()[last];
    match (grayscale, channels) {
        (true, 1) => Ok(image),
        (true, 3) => {
            let mut gray = image.index_axis(Axis(last), 0).mapv(|v| v * LUMA[0]);
            gray.zip_mut_with(&image.index_axis(Axis(last), 1), |acc, &v| {
                *acc += v * LUMA[1]
            });
            gray.zip_mut_with(&image.index_axis(Axis(last), 2), |acc, &v| {
                *acc += v * LUMA[2]
            });
            Ok(gray.insert_axis(Axis(last)))
        }
        (true, c) => Err(DatasetError::Shape(format!(
            "cannot convert {c}-channel image to grayscale"
        ))),
        (false, 1) => {
            let view = image.view();
            concatenate(Axis(last), &[view.clone(), view.clone(), view])
                .map_err(|e| DatasetError::Shape(e.to_string()))
        }
        (false, _) => Ok(image),
    }
}
