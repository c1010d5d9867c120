//! Batch generation: load, augment, preprocess, and stack samples in sequence order.

use crate::aug::AugmentationPolicy;
use crate::loader::{image_path, ImageFileLoader, ImageLoader, LoadRequest};
use crate::preprocess::{resize, to_channels};
use crate::standardize::StandardizeMode;
use crate::subfunctions::Subfunction;
use crate::types::{Batch, DatasetError, DatasetResult, ImageTensor, LoaderOptions};
use ndarray::{Array1, Array2, ArrayView, Axis, IxDyn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub batch_size: usize,
    /// Target spatial shape, one entry per spatial axis. `None` keeps loaded shapes.
    pub resize: Option<Vec<usize>>,
    pub grayscale: bool,
    pub standardize_mode: StandardizeMode,
    /// Extension appended to sample identifiers; `None` when identifiers are file names.
    pub image_format: Option<String>,
    /// Seeds shuffling and per-item augmentation.
    pub seed: Option<u64>,
    /// Worker threads for per-item preprocessing. 1 runs inline.
    pub workers: usize,
    pub shuffle: bool,
    /// Check that every image exists when the generator is built instead of on load.
    pub validate_files: bool,
    pub loader_options: LoaderOptions,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            resize: Some(vec![224, 224]),
            grayscale: false,
            standardize_mode: StandardizeMode::ZScore,
            image_format: None,
            seed: None,
            workers: 1,
            shuffle: false,
            validate_files: false,
            loader_options: LoaderOptions::new(),
        }
    }
}

pub struct DataGeneratorBuilder {
    samples: Vec<String>,
    image_dir: PathBuf,
    cfg: GeneratorConfig,
    policy: Option<Arc<AugmentationPolicy>>,
    subfunctions: Vec<Arc<dyn Subfunction>>,
    loader: Arc<dyn ImageLoader>,
    labels: Option<Array2<f32>>,
    weights: Option<Array1<f32>>,
}

impl DataGeneratorBuilder {
    pub fn config(mut self, cfg: GeneratorConfig) -> Self {
        self.cfg = cfg;
        self
    }
    pub fn policy(mut self, policy: Option<Arc<AugmentationPolicy>>) -> Self {
        self.policy = policy;
        self
    }
    pub fn subfunctions(mut self, subfunctions: Vec<Arc<dyn Subfunction>>) -> Self {
        self.subfunctions = subfunctions;
        self
    }
    pub fn loader(mut self, loader: Arc<dyn ImageLoader>) -> Self {
        self.loader = loader;
        self
    }
    pub fn labels(mut self, labels: Option<Array2<f32>>) -> Self {
        self.labels = labels;
        self
    }
    pub fn sample_weights(mut self, weights: Option<Array1<f32>>) -> Self {
        self.weights = weights;
        self
    }

    pub fn build(self) -> DatasetResult<DataGenerator> {
        let cfg = self.cfg;
        if cfg.batch_size == 0 {
            return Err(DatasetError::Configuration(
                "batch_size must be positive".into(),
            ));
        }
        let n = self.samples.len();
        if let Some(labels) = &self.labels {
            if labels.nrows() != n {
                return Err(DatasetError::data_format(
                    &self.image_dir,
                    format!("{} label rows for {n} samples", labels.nrows()),
                ));
            }
        }
        if let Some(weights) = &self.weights {
            if weights.len() != n {
                return Err(DatasetError::data_format(
                    &self.image_dir,
                    format!("{} sample weights for {n} samples", weights.len()),
                ));
            }
        }
        if cfg.validate_files {
            validate_files(&self.samples, &self.image_dir, cfg.image_format.as_deref())?;
        }

        let mut order: Vec<usize> = (0..n).collect();
        if cfg.shuffle {
            let mut rng = match cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }

        let pool = if cfg.workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(cfg.workers)
                    .thread_name(|i| format!("medi-generator-{i}"))
                    .build()
                    .map_err(|e| DatasetError::Configuration(format!("worker pool: {e}")))?,
            )
        } else {
            None
        };

        debug!(
            samples = n,
            batch_size = cfg.batch_size,
            workers = cfg.workers,
            shuffle = cfg.shuffle,
            policy = %self
                .policy
                .as_ref()
                .map(|p| p.describe())
                .unwrap_or_else(|| "none".to_string()),
            subfunctions = ?subfunction_names(&self.subfunctions),
            "data generator ready"
        );

        Ok(DataGenerator {
            samples: self.samples,
            image_dir: self.image_dir,
            order,
            cursor: 0,
            failed: false,
            policy: self.policy,
            subfunctions: self.subfunctions,
            loader: self.loader,
            labels: self.labels,
            weights: self.weights,
            cfg,
            pool,
            progress: Progress::from_env(),
        })
    }
}

/// Iterates fixed-size batches over a sample sequence.
///
/// Rows are emitted in sequence order (or the seeded shuffle order) regardless of
/// the worker count. Per-item randomness is seeded from the item's position in the
/// sequence, so output does not depend on scheduling. Missing images are reported
/// when the item is loaded unless `validate_files` is set. The first error ends
/// iteration.
pub struct DataGenerator {
    samples: Vec<String>,
    image_dir: PathBuf,
    order: Vec<usize>,
    cursor: usize,
    failed: bool,
    policy: Option<Arc<AugmentationPolicy>>,
    subfunctions: Vec<Arc<dyn Subfunction>>,
    loader: Arc<dyn ImageLoader>,
    labels: Option<Array2<f32>>,
    weights: Option<Array1<f32>>,
    cfg: GeneratorConfig,
    pool: Option<rayon::ThreadPool>,
    progress: Progress,
}

impl DataGenerator {
    pub fn builder(samples: Vec<String>, image_dir: impl Into<PathBuf>) -> DataGeneratorBuilder {
        DataGeneratorBuilder {
            samples,
            image_dir: image_dir.into(),
            cfg: GeneratorConfig::default(),
            policy: None,
            subfunctions: Vec::new(),
            loader: Arc::new(ImageFileLoader),
            labels: None,
            weights: None,
        }
    }

    /// Number of batches in one pass.
    pub fn len(&self) -> usize {
        self.samples.len().div_ceil(self.cfg.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.cfg
    }

    pub fn next_batch(&mut self) -> DatasetResult<Option<Batch>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.cfg.batch_size).min(self.order.len());
        let positions = self.order[self.cursor..end].to_vec();

        let t_load = Instant::now();
        let mut loaded: Vec<(usize, DatasetResult<ImageTensor>)> = match &self.pool {
            Some(pool) => pool.install(|| {
                positions
                    .par_iter()
                    .enumerate()
                    .map(|(i, &pos)| (i, self.process(pos)))
                    .collect()
            }),
            None => positions
                .iter()
                .enumerate()
                .map(|(i, &pos)| (i, self.process(pos)))
                .collect(),
        };
        loaded.sort_by_key(|(i, _)| *i);
        let load_elapsed = t_load.elapsed();

        let images = loaded
            .into_iter()
            .map(|(_, res)| res)
            .collect::<DatasetResult<Vec<_>>>()?;
        let images = stack(&images)?;

        let labels = self
            .labels
            .as_ref()
            .map(|labels| labels.select(Axis(0), &positions));
        let weights = self
            .weights
            .as_ref()
            .map(|weights| weights.select(Axis(0), &positions));

        self.cursor = end;
        self.progress.record(positions.len(), load_elapsed);
        Ok(Some(Batch {
            images,
            positions,
            labels,
            weights,
        }))
    }

    /// Run the full per-item pipeline for the sample at `pos` in the sequence.
    fn process(&self, pos: usize) -> DatasetResult<ImageTensor> {
        let request = LoadRequest {
            sample: &self.samples[pos],
            image_dir: &self.image_dir,
            image_format: self.cfg.image_format.as_deref(),
            grayscale: self.cfg.grayscale,
            options: &self.cfg.loader_options,
        };
        let mut img = self.loader.load(&request)?;

        if let Some(policy) = &self.policy {
            // Seeded per position when a seed is set, else thread-local.
            let mut rng_local;
            let mut seeded_rng;
            let rng: &mut dyn rand::RngCore = if let Some(seed) = self.cfg.seed {
                seeded_rng = rand::rngs::StdRng::seed_from_u64(mix_seed(seed, pos));
                &mut seeded_rng
            } else {
                rng_local = rand::rng();
                &mut rng_local
            };
            img = policy.apply(img, rng)?;
        }
        for sf in &self.subfunctions {
            img = sf.transform(img)?;
        }
        if let Some(shape) = &self.cfg.resize {
            img = resize(&img, shape)?;
        }
        let img = to_channels(img, self.cfg.grayscale)?;
        self.cfg.standardize_mode.apply(img)
    }
}

impl Iterator for DataGenerator {
    type Item = DatasetResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for DataGenerator {}

fn mix_seed(seed: u64, pos: usize) -> u64 {
    seed ^ (pos as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn validate_files(samples: &[String], dir: &Path, format: Option<&str>) -> DatasetResult<()> {
    for sample in samples {
        let path = image_path(dir, sample, format);
        if !path.exists() {
            return Err(DatasetError::MissingImage {
                sample: sample.clone(),
                path,
            });
        }
    }
    Ok(())
}

fn stack(images: &[ImageTensor]) -> DatasetResult<ndarray::ArrayD<f32>> {
    let Some(first) = images.first() else {
        return Err(DatasetError::Shape("cannot stack an empty batch".into()));
    };
    if let Some(odd) = images.iter().find(|img| img.shape() != first.shape()) {
        return Err(DatasetError::Shape(format!(
            "batch contains varying image shapes ({:?} vs {:?}); set a resize shape to force consistency",
            first.shape(),
            odd.shape()
        )));
    }
    let views: Vec<ArrayView<'_, f32, IxDyn>> = images.iter().map(|img| img.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| DatasetError::Shape(e.to_string()))
}

struct Progress {
    started: Instant,
    processed_samples: usize,
    processed_batches: usize,
    total_load_time: Duration,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
}

impl Progress {
    fn from_env() -> Self {
        let log_every_samples =
            parse_log_every(std::env::var("MEDI_DATASET_LOG_EVERY").ok().as_deref());
        let now = Instant::now();
        Self {
            started: now,
            processed_samples: 0,
            processed_batches: 0,
            total_load_time: Duration::ZERO,
            last_log: now,
            last_logged_samples: 0,
            log_every_samples,
        }
    }

    fn record(&mut self, samples: usize, load_elapsed: Duration) {
        self.processed_samples += samples;
        self.processed_batches += 1;
        self.total_load_time += load_elapsed;

        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        if processed_since < threshold && self.last_log.elapsed() < Duration::from_secs(30) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms =
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches as f64;
        info!(
            batches = self.processed_batches,
            samples = self.processed_samples,
            elapsed_s = secs,
            rate = self.processed_samples as f32 / secs,
            avg_load_ms,
            "[dataset] progress"
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}

/// `MEDI_DATASET_LOG_EVERY`: unset means the default, `off`/`0` or garbage disable logging.
fn parse_log_every(raw: Option<&str>) -> Option<usize> {
    let Some(raw) = raw else {
        return Some(DEFAULT_LOG_EVERY_SAMPLES);
    };
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("off") {
        return None;
    }
    raw.parse::<usize>().ok().filter(|v| *v > 0)
}

fn subfunction_names(subfunctions: &[Arc<dyn Subfunction>]) -> Vec<&str> {
    subfunctions.iter().map(|sf| sf.name()).collect()
}

#[cfg(feature = "burn-runtime")]
impl Batch {
    /// Copy the image block into a Burn tensor of rank `D` (batch axis included).
    pub fn images_tensor<B: burn::tensor::backend::Backend, const D: usize>(
        &self,
        device: &B::Device,
    ) -> DatasetResult<burn::tensor::Tensor<B, D>> {
        let shape: [usize; D] = self.images.shape().try_into().map_err(|_| {
            DatasetError::Shape(format!(
                "batch of shape {:?} does not have rank {D}",
                self.images.shape()
            ))
        })?;
        let data: Vec<f32> = self.images.iter().copied().collect();
        Ok(burn::tensor::Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape(shape))
    }
}
