//! Stochastic image and volume augmentation policies.

use crate::preprocess::resize;
use crate::types::{DatasetError, DatasetResult, Dims, ImageTensor};
use ndarray::{ArrayD, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Strength parameters for the individual transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationParams {
    /// Max brightness shift as a fraction of the intensity range.
    pub brightness_limit: f32,
    /// Max contrast scale deviation from 1.0.
    pub contrast_limit: f32,
    /// Max saturation scale deviation from 1.0.
    pub saturation_limit: f32,
    pub gamma_min: f32,
    pub gamma_max: f32,
    /// Max absolute noise as a fraction of the intensity range.
    pub noise_strength: f32,
    /// Downscaling factor range, both in (0, 1].
    pub downscaling_min: f32,
    pub downscaling_max: f32,
}

impl Default for AugmentationParams {
    fn default() -> Self {
        Self {
            brightness_limit: 0.1,
            contrast_limit: 0.1,
            saturation_limit: 0.1,
            gamma_min: 0.8,
            gamma_max: 1.2,
            noise_strength: 0.02,
            downscaling_min: 0.25,
            downscaling_max: 0.5,
        }
    }
}

/// Which stochastic transforms run, and how strongly.
///
/// Transforms run in field order, each with probability `probability`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationPolicy {
    pub dims: Dims,
    pub probability: f32,
    pub flip: bool,
    pub rotate: bool,
    pub brightness: bool,
    pub contrast: bool,
    pub saturation: bool,
    pub gamma: bool,
    pub noise: bool,
    pub blur: bool,
    pub downscaling: bool,
    pub params: AugmentationParams,
}

impl AugmentationPolicy {
    /// Inference-time policy: random flips and 90° rotations only.
    pub fn inference(dims: Dims) -> Self {
        AugmentationPolicyBuilder::new(dims)
            .brightness(false)
            .contrast(false)
            .saturation(false)
            .gamma(false)
            .noise(false)
            .blur(false)
            .downscaling(false)
            .build()
    }

    pub fn image_default() -> Self {
        Self::inference(Dims::Image)
    }

    pub fn volume_default() -> Self {
        Self::inference(Dims::Volume)
    }

    /// Names of the enabled transforms, in application order.
    pub fn enabled(&self) -> Vec<&'static str> {
        [
            (self.flip, "flip"),
            (self.rotate, "rotate"),
            (self.brightness, "brightness"),
            (self.contrast, "contrast"),
            (self.saturation, "saturation"),
            (self.gamma, "gamma"),
            (self.noise, "noise"),
            (self.blur, "blur"),
            (self.downscaling, "downscaling"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }

    pub fn describe(&self) -> String {
        format!(
            "dims={:?} p={:.2} transforms=[{}] brightness={:.2} contrast={:.2} saturation={:.2} gamma=[{:.2},{:.2}] noise={:.3} downscaling=[{:.2},{:.2}]",
            self.dims,
            self.probability,
            self.enabled().join(","),
            self.params.brightness_limit,
            self.params.contrast_limit,
            self.params.saturation_limit,
            self.params.gamma_min,
            self.params.gamma_max,
            self.params.noise_strength,
            self.params.downscaling_min,
            self.params.downscaling_max,
        )
    }

    /// Produce one randomized variant of `image`.
    pub fn apply(
        &self,
        image: ImageTensor,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<ImageTensor> {
        if image.ndim() != self.dims.rank() {
            return Err(DatasetError::Shape(format!(
                "{:?} augmentation expects rank {}, got shape {:?}",
                self.dims,
                self.dims.rank(),
                image.shape()
            )));
        }
        let p = self.probability;
        let params = &self.params;
        let mut img = image;
        if self.flip {
            maybe_flip(&mut img, self.dims.spatial(), p, rng);
        }
        if self.rotate {
            maybe_rotate90(&mut img, p, rng);
        }
        if self.brightness {
            maybe_brightness(&mut img, p, params.brightness_limit, rng);
        }
        if self.contrast {
            maybe_contrast(&mut img, p, params.contrast_limit, rng);
        }
        if self.saturation {
            maybe_saturation(&mut img, p, params.saturation_limit, rng);
        }
        if self.gamma {
            maybe_gamma(&mut img, p, params.gamma_min, params.gamma_max, rng);
        }
        if self.noise {
            maybe_noise(&mut img, p, params.noise_strength, rng);
        }
        if self.blur {
            maybe_blur(&mut img, self.dims.spatial(), p, rng);
        }
        if self.downscaling {
            maybe_downscale(
                &mut img,
                p,
                params.downscaling_min,
                params.downscaling_max,
                rng,
            )?;
        }
        Ok(img.as_standard_layout().into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct AugmentationPolicyBuilder {
    inner: AugmentationPolicy,
}

impl AugmentationPolicyBuilder {
    /// Starts with every transform enabled.
    pub fn new(dims: Dims) -> Self {
        Self {
            inner: AugmentationPolicy {
                dims,
                probability: 0.5,
                flip: true,
                rotate: true,
                brightness: true,
                contrast: true,
                saturation: true,
                gamma: true,
                noise: true,
                blur: true,
                downscaling: true,
                params: AugmentationParams::default(),
            },
        }
    }
    pub fn probability(mut self, p: f32) -> Self {
        self.inner.probability = p.clamp(0.0, 1.0);
        self
    }
    pub fn flip(mut self, on: bool) -> Self {
        self.inner.flip = on;
        self
    }
    pub fn rotate(mut self, on: bool) -> Self {
        self.inner.rotate = on;
        self
    }
    pub fn brightness(mut self, on: bool) -> Self {
        self.inner.brightness = on;
        self
    }
    pub fn contrast(mut self, on: bool) -> Self {
        self.inner.contrast = on;
        self
    }
    pub fn saturation(mut self, on: bool) -> Self {
        self.inner.saturation = on;
        self
    }
    pub fn gamma(mut self, on: bool) -> Self {
        self.inner.gamma = on;
        self
    }
    pub fn noise(mut self, on: bool) -> Self {
        self.inner.noise = on;
        self
    }
    pub fn blur(mut self, on: bool) -> Self {
        self.inner.blur = on;
        self
    }
    pub fn downscaling(mut self, on: bool) -> Self {
        self.inner.downscaling = on;
        self
    }
    pub fn params(mut self, params: AugmentationParams) -> Self {
        self.inner.params = params;
        self
    }
    pub fn build(self) -> AugmentationPolicy {
        self.inner
    }
}

fn hit(p: f32, rng: &mut dyn rand::RngCore) -> bool {
    p > 0.0 && rng.random_range(0.0..1.0) < p
}

fn intensity_range(img: &ImageTensor) -> (f32, f32) {
    let min = img.iter().copied().fold(f32::INFINITY, f32::min);
    let max = img.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (min, max)
}

fn span(img: &ImageTensor) -> f32 {
    let (min, max) = intensity_range(img);
    let span = max - min;
    if span.is_finite() && span > f32::EPSILON {
        span
    } else {
        1.0
    }
}

pub(crate) fn maybe_flip(
    img: &mut ImageTensor,
    spatial: usize,
    p: f32,
    rng: &mut dyn rand::RngCore,
) {
    for axis in 0..spatial {
        if hit(p, rng) {
            img.invert_axis(Axis(axis));
        }
    }
}

pub(crate) fn maybe_rotate90(img: &mut ImageTensor, p: f32, rng: &mut dyn rand::RngCore) {
    if !hit(p, rng) {
        return;
    }
    let turns = rng.random_range(1..4);
    for _ in 0..turns {
        img.swap_axes(0, 1);
        img.invert_axis(Axis(1));
    }
}

fn maybe_brightness(img: &mut ImageTensor, p: f32, limit: f32, rng: &mut dyn rand::RngCore) {
    if limit <= 0.0 || !hit(p, rng) {
        return;
    }
    let delta = rng.random_range(-limit..limit) * span(img);
    img.mapv_inplace(|v| v + delta);
}

fn maybe_contrast(img: &mut ImageTensor, p: f32, limit: f32, rng: &mut dyn rand::RngCore) {
    if limit <= 0.0 || !hit(p, rng) {
        return;
    }
    let factor = 1.0 + rng.random_range(-limit..limit);
    let mean = img.mean().unwrap_or(0.0);
    img.mapv_inplace(|v| (v - mean) * factor + mean);
}

fn maybe_saturation(img: &mut ImageTensor, p: f32, limit: f32, rng: &mut dyn rand::RngCore) {
    let last = img.ndim() - 1;
    if limit <= 0.0 || img.shape()[last] != 3 || !hit(p, rng) {
        return;
    }
    let factor = 1.0 + rng.random_range(-limit..limit);
    for mut px in img.lanes_mut(Axis(last)) {
        let gray = 0.299 * px[0] + 0.587 * px[1] + 0.114 * px[2];
        px.mapv_inplace(|v| gray + (v - gray) * factor);
    }
}

fn maybe_gamma(
    img: &mut ImageTensor,
    p: f32,
    min: f32,
    max: f32,
    rng: &mut dyn rand::RngCore,
) {
    if min <= 0.0 || max <= min || !hit(p, rng) {
        return;
    }
    let gamma = rng.random_range(min..max);
    let (lo, _) = intensity_range(img);
    let range = span(img);
    img.mapv_inplace(|v| lo + ((v - lo) / range).clamp(0.0, 1.0).powf(gamma) * range);
}

fn maybe_noise(img: &mut ImageTensor, p: f32, strength: f32, rng: &mut dyn rand::RngCore) {
    if strength <= 0.0 || !hit(p, rng) {
        return;
    }
    let amp = strength * span(img);
    img.mapv_inplace(|v| v + rng.random_range(-amp..amp));
}

fn maybe_blur(img: &mut ImageTensor, spatial: usize, p: f32, rng: &mut dyn rand::RngCore) {
    if !hit(p, rng) {
        return;
    }
    for axis in 0..spatial {
        *img = box_blur_axis(img, axis);
    }
}

fn box_blur_axis(img: &ImageTensor, axis: usize) -> ImageTensor {
    let n = img.shape()[axis];
    let mut out = ArrayD::<f32>::zeros(img.raw_dim());
    for i in 0..n {
        let prev = img.index_axis(Axis(axis), i.saturating_sub(1));
        let cur = img.index_axis(Axis(axis), i);
        let next = img.index_axis(Axis(axis), (i + 1).min(n - 1));
        Zip::from(out.index_axis_mut(Axis(axis), i))
            .and(&prev)
            .and(&cur)
            .and(&next)
            .for_each(|dst, &a, &b, &c| *dst = (a + b + c) / 3.0);
    }
    out
}

fn maybe_downscale(
    img: &mut ImageTensor,
    p: f32,
    min: f32,
    max: f32,
    rng: &mut dyn rand::RngCore,
) -> DatasetResult<()> {
    if min <= 0.0 || max < min || max > 1.0 || !hit(p, rng) {
        return Ok(());
    }
    let factor = if max > min {
        rng.random_range(min..max)
    } else {
        min
    };
    let spatial = &img.shape()[..img.ndim() - 1];
    let original = spatial.to_vec();
    let small: Vec<usize> = spatial
        .iter()
        .map(|&n| ((n as f32 * factor).round() as usize).max(1))
        .collect();
    let down = resize(img, &small)?;
    *img = resize(&down, &original)?;
    Ok(())
}
