//! Test-time augmentation: predict every sample several times under random
//! augmentation and aggregate the per-cycle predictions.

use crate::aggregate::{Aggregate, AggregateRegistry};
use crate::error::{EnsembleError, EnsembleResult};
use crate::model::Predictor;
use medi_dataset::{
    AugmentationPolicy, DataGenerator, Dims, GeneratorConfig, ImageFileLoader, ImageLoader,
    LoaderOptions, StandardizeMode, Subfunction,
};
use ndarray::{s, Array2};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_N_CYCLES: usize = 10;

/// Knobs for [`predict_augmenting`]. `Default` builds fresh values on every call.
#[derive(Clone)]
pub struct AugmentingOptions {
    /// Augmented predictions per sample. Must be positive.
    pub n_cycles: usize,
    /// Explicit policy, used as-is. `None` picks flip + rotate for the model's input rank.
    pub policy: Option<Arc<AugmentationPolicy>>,
    pub aggregate: Aggregate,
    pub image_format: Option<String>,
    pub batch_size: usize,
    pub resize: Option<Vec<usize>>,
    pub grayscale: bool,
    pub subfunctions: Vec<Arc<dyn Subfunction>>,
    pub standardize_mode: StandardizeMode,
    pub loader: Arc<dyn ImageLoader>,
    pub seed: Option<u64>,
    pub workers: usize,
    pub loader_options: LoaderOptions,
}

impl Default for AugmentingOptions {
    fn default() -> Self {
        let generator = GeneratorConfig::default();
        Self {
            n_cycles: DEFAULT_N_CYCLES,
            policy: None,
            aggregate: Aggregate::default(),
            image_format: generator.image_format,
            batch_size: generator.batch_size,
            resize: generator.resize,
            grayscale: generator.grayscale,
            subfunctions: Vec::new(),
            standardize_mode: generator.standardize_mode,
            loader: Arc::new(ImageFileLoader),
            seed: generator.seed,
            workers: generator.workers,
            loader_options: generator.loader_options,
        }
    }
}

impl AugmentingOptions {
    pub fn with_n_cycles(mut self, n_cycles: usize) -> Self {
        self.n_cycles = n_cycles;
        self
    }
    pub fn with_policy(mut self, policy: AugmentationPolicy) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }
    pub fn with_aggregate(mut self, aggregate: impl Into<Aggregate>) -> Self {
        self.aggregate = aggregate.into();
        self
    }
    pub fn with_image_format(mut self, image_format: Option<String>) -> Self {
        self.image_format = image_format;
        self
    }
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
    pub fn with_resize(mut self, resize: Option<Vec<usize>>) -> Self {
        self.resize = resize;
        self
    }
    pub fn with_grayscale(mut self, grayscale: bool) -> Self {
        self.grayscale = grayscale;
        self
    }
    pub fn with_subfunctions(mut self, subfunctions: Vec<Arc<dyn Subfunction>>) -> Self {
        self.subfunctions = subfunctions;
        self
    }
    pub fn with_standardize_mode(mut self, mode: StandardizeMode) -> Self {
        self.standardize_mode = mode;
        self
    }
    pub fn with_loader(mut self, loader: Arc<dyn ImageLoader>) -> Self {
        self.loader = loader;
        self
    }
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
    pub fn with_loader_options(mut self, options: LoaderOptions) -> Self {
        self.loader_options = options;
        self
    }

    /// Generator settings for the replicated sequence. Shuffling is always off.
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            batch_size: self.batch_size,
            resize: self.resize.clone(),
            grayscale: self.grayscale,
            standardize_mode: self.standardize_mode,
            image_format: self.image_format.clone(),
            seed: self.seed,
            workers: self.workers,
            shuffle: false,
            validate_files: false,
            loader_options: self.loader_options.clone(),
        }
    }
}

/// Repeat every sample `n_cycles` times in place: `[a, b]` -> `[a, a, b, b]`.
pub fn replicate_samples(samples: &[String], n_cycles: usize) -> Vec<String> {
    samples
        .iter()
        .flat_map(|sample| std::iter::repeat(sample).take(n_cycles).cloned())
        .collect()
}

/// Use `explicit` when given, else the flip + rotate policy for the input rank (3 or 4).
pub fn resolve_policy(
    explicit: Option<Arc<AugmentationPolicy>>,
    input_shape: &[usize],
) -> EnsembleResult<Arc<AugmentationPolicy>> {
    if let Some(policy) = explicit {
        return Ok(policy);
    }
    let dims = Dims::from_rank(input_shape.len()).ok_or_else(|| {
        EnsembleError::Configuration(format!(
            "cannot pick a default augmentation for model input shape {input_shape:?}; \
             expected rank 3 (image) or 4 (volume)"
        ))
    })?;
    Ok(Arc::new(AugmentationPolicy::inference(dims)))
}

/// Test-time augmentation with the built-in aggregate registry.
pub fn predict_augmenting(
    model: &dyn Predictor,
    samples: &[String],
    image_dir: &Path,
    options: &AugmentingOptions,
) -> EnsembleResult<Array2<f32>> {
    predict_augmenting_with_registry(model, samples, image_dir, options, AggregateRegistry::global())
}

/// Predict each sample `n_cycles` times under random augmentation and aggregate
/// the per-cycle predictions into one row per sample, in input order.
///
/// Rows `[i * n_cycles, (i + 1) * n_cycles)` of the model output belong to
/// `samples[i]`. The model must return exactly one row per replicated item.
pub fn predict_augmenting_with_registry(
    model: &dyn Predictor,
    samples: &[String],
    image_dir: &Path,
    options: &AugmentingOptions,
    registry: &AggregateRegistry,
) -> EnsembleResult<Array2<f32>> {
    let n_cycles = options.n_cycles;
    if n_cycles == 0 {
        return Err(EnsembleError::Configuration(
            "n_cycles must be positive".into(),
        ));
    }
    let aggregate = options.aggregate.resolve(registry)?;
    let policy = resolve_policy(options.policy.clone(), model.input_shape())?;

    let replicated = replicate_samples(samples, n_cycles);
    let expected = replicated.len();
    info!(
        samples = samples.len(),
        n_cycles,
        aggregate = %options.aggregate,
        policy = %policy.describe(),
        "test-time augmentation"
    );

    let mut generator = DataGenerator::builder(replicated, image_dir)
        .config(options.generator_config())
        .policy(Some(policy))
        .subfunctions(options.subfunctions.clone())
        .loader(Arc::clone(&options.loader))
        .build()?;

    let started = Instant::now();
    let predictions = model
        .predict(&mut generator)
        .map_err(EnsembleError::from_model)?;
    if predictions.nrows() != expected {
        return Err(EnsembleError::Consistency {
            expected,
            actual: predictions.nrows(),
        });
    }

    let classes = predictions.ncols();
    let mut ensembled = Array2::<f32>::zeros((samples.len(), classes));
    for (i, mut row) in ensembled.outer_iter_mut().enumerate() {
        let start = i * n_cycles;
        let subset = predictions.slice(s![start..start + n_cycles, ..]);
        let vector = aggregate.aggregate(subset);
        if vector.len() != classes {
            return Err(EnsembleError::Consistency {
                expected: classes,
                actual: vector.len(),
            });
        }
        row.assign(&vector);
    }
    debug!(
        rows = ensembled.nrows(),
        classes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "ensembled predictions"
    );
    Ok(ensembled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BatchPredictor;
    use medi_dataset::{DatasetError, ImageTensor};
    use ndarray::arr2;

    /// Returns a canned matrix without reading any image.
    struct FixedModel {
        input_shape: Vec<usize>,
        output: Array2<f32>,
    }

    impl Predictor for FixedModel {
        fn input_shape(&self) -> &[usize] {
            &self.input_shape
        }
        fn predict(&self, _batches: &mut DataGenerator) -> anyhow::Result<Array2<f32>> {
            Ok(self.output.clone())
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    fn fixed(output: Array2<f32>) -> FixedModel {
        FixedModel {
            input_shape: vec![224, 224, 3],
            output,
        }
    }

    #[test]
    fn replication_keeps_blocks_contiguous() {
        let samples = names(3);
        let replicated = replicate_samples(&samples, 4);
        assert_eq!(replicated.len(), 12);
        for (i, chunk) in replicated.chunks(4).enumerate() {
            assert!(chunk.iter().all(|s| *s == samples[i]));
        }
        assert!(replicate_samples(&[], 4).is_empty());
    }

    #[test]
    fn mean_of_contiguous_blocks() {
        let output = arr2(&[
            [1.0f32, 0.0],
            [0.0, 1.0],
            [0.2, 0.8],
            [0.4, 0.6],
            [0.9, 0.1],
            [0.7, 0.3],
        ]);
        let model = fixed(output);
        let options = AugmentingOptions::default().with_n_cycles(2);
        let preds = predict_augmenting(&model, &names(3), Path::new("unused"), &options).unwrap();
        let expected = arr2(&[[0.5f32, 0.5], [0.3, 0.7], [0.8, 0.2]]);
        assert_eq!(preds.dim(), (3, 2));
        for (a, b) in preds.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn row_count_mismatch_is_inconsistent() {
        let model = fixed(Array2::zeros((5, 2)));
        let options = AugmentingOptions::default().with_n_cycles(2);
        let err = predict_augmenting(&model, &names(3), Path::new("unused"), &options)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EnsembleError::Consistency {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn unknown_aggregate_fails_before_prediction() {
        let model = fixed(Array2::zeros((2, 2)));
        let options = AugmentingOptions::default()
            .with_n_cycles(2)
            .with_aggregate("bogus");
        let err = predict_augmenting(&model, &names(1), Path::new("unused"), &options)
            .err()
            .unwrap();
        assert!(matches!(err, EnsembleError::Configuration(_)));
    }

    #[test]
    fn zero_cycles_is_rejected() {
        let model = fixed(Array2::zeros((0, 2)));
        let options = AugmentingOptions::default().with_n_cycles(0);
        let err = predict_augmenting(&model, &names(1), Path::new("unused"), &options)
            .err()
            .unwrap();
        assert!(matches!(err, EnsembleError::Configuration(_)));
    }

    #[test]
    fn default_policy_follows_input_rank() {
        let image = resolve_policy(None, &[224, 224, 3]).unwrap();
        assert_eq!(image.dims, Dims::Image);
        assert_eq!(image.enabled(), vec!["flip", "rotate"]);

        let volume = resolve_policy(None, &[64, 64, 64, 1]).unwrap();
        assert_eq!(volume.dims, Dims::Volume);
        assert_eq!(volume.enabled(), vec!["flip", "rotate"]);

        assert!(matches!(
            resolve_policy(None, &[1, 64, 64, 64, 1]),
            Err(EnsembleError::Configuration(_))
        ));
    }

    #[test]
    fn explicit_policy_is_used_verbatim() {
        let explicit = Arc::new(
            medi_dataset::AugmentationPolicyBuilder::new(Dims::Volume)
                .probability(0.9)
                .build(),
        );
        let resolved = resolve_policy(Some(Arc::clone(&explicit)), &[1, 2, 3, 4, 5]).unwrap();
        assert!(Arc::ptr_eq(&resolved, &explicit));
    }

    #[test]
    fn unsupported_rank_without_policy_fails() {
        let model = FixedModel {
            input_shape: vec![1, 2, 3, 4, 5],
            output: Array2::zeros((2, 2)),
        };
        let options = AugmentingOptions::default().with_n_cycles(2);
        let err = predict_augmenting(&model, &names(1), Path::new("unused"), &options)
            .err()
            .unwrap();
        assert!(matches!(err, EnsembleError::Configuration(_)));
    }

    #[test]
    fn empty_sample_list_yields_empty_matrix() {
        let model = fixed(Array2::zeros((0, 4)));
        let preds = predict_augmenting(
            &model,
            &[],
            Path::new("unused"),
            &AugmentingOptions::default(),
        )
        .unwrap();
        assert_eq!(preds.dim(), (0, 4));
    }

    #[test]
    fn loader_failures_surface_as_dataset_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let model = BatchPredictor::new(vec![4, 4, 3], |batch: &medi_dataset::Batch| {
            Ok(Array2::zeros((batch.len(), 2)))
        });
        let options = AugmentingOptions::default().with_n_cycles(3);
        let err = predict_augmenting(&model, &names(2), tmp.path(), &options)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EnsembleError::Dataset(DatasetError::MissingImage { .. })
        ));
    }

    #[test]
    fn custom_loader_and_seed_drive_the_generator() {
        struct Constant;
        impl ImageLoader for Constant {
            fn load(&self, request: &medi_dataset::LoadRequest<'_>) -> medi_dataset::DatasetResult<ImageTensor> {
                let value: f32 = request.sample.trim_start_matches('s').parse().unwrap_or(0.0);
                Ok(ImageTensor::from_elem(ndarray::IxDyn(&[3, 3, 3]), value))
            }
        }
        let model = BatchPredictor::new(vec![3, 3, 3], |batch: &medi_dataset::Batch| {
            let n = batch.len();
            let per_item = batch.images.len() / n.max(1);
            let flat = batch.images.as_standard_layout();
            let means: Vec<f32> = flat
                .as_slice()
                .unwrap_or(&[])
                .chunks(per_item.max(1))
                .map(|c| c.iter().sum::<f32>() / c.len() as f32)
                .collect();
            Ok(Array2::from_shape_vec((n, 1), means)?)
        });
        let options = AugmentingOptions::default()
            .with_n_cycles(3)
            .with_batch_size(4)
            .with_resize(None)
            .with_standardize_mode(StandardizeMode::Tf)
            .with_loader(Arc::new(Constant))
            .with_seed(Some(3))
            .with_workers(2)
            .with_aggregate("median");
        let preds = predict_augmenting(&model, &names(3), Path::new("unused"), &options).unwrap();
        assert_eq!(preds.dim(), (3, 1));
        for (i, v) in preds.column(0).iter().enumerate() {
            let expected = i as f32 / 127.5 - 1.0;
            assert!((v - expected).abs() < 1e-6, "row {i}: {v} vs {expected}");
        }
    }
}
