//! Dry-run helpers: summarize a dataset descriptor and build the generator a
//! test-time augmentation run would use, without a model.

use std::fmt;
use std::path::Path;

use medi_dataset::{DataGenerator, JsonDataset};
use medi_ensembler::{replicate_samples, resolve_policy, AugmentingOptions, EnsembleResult};
use medi_models::architecture_meta;

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub samples: usize,
    pub image_format: Option<String>,
    /// Class name and sample count, in class index order. Empty for inference descriptors.
    pub classes: Vec<(String, usize)>,
}

pub fn summarize(dataset: &JsonDataset) -> DatasetSummary {
    let classes = match (&dataset.class_names, dataset.class_counts()) {
        (Some(names), Some(counts)) => names.iter().cloned().zip(counts).collect(),
        _ => Vec::new(),
    };
    DatasetSummary {
        samples: dataset.samples.len(),
        image_format: dataset.image_format.clone(),
        classes,
    }
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "samples: {}", self.samples)?;
        writeln!(
            f,
            "image format: {}",
            self.image_format.as_deref().unwrap_or("<from sample keys>")
        )?;
        if self.classes.is_empty() {
            return writeln!(f, "classes: none (inference descriptor)");
        }
        writeln!(f, "classes: {}", self.classes.len())?;
        for (name, count) in &self.classes {
            writeln!(f, "  {name}: {count}")?;
        }
        Ok(())
    }
}

/// Per-sample model input shape used to pick the default augmentation policy.
///
/// A known architecture contributes its spatial input; otherwise the resize
/// shape is used, falling back to a 2D 224x224 input.
pub fn model_input_shape(options: &AugmentingOptions, architecture: Option<&str>) -> Vec<usize> {
    let channels = if options.grayscale { 1 } else { 3 };
    if let Some(meta) = architecture.and_then(architecture_meta) {
        return meta.model_input(channels);
    }
    let mut shape = options.resize.clone().unwrap_or_else(|| vec![224, 224]);
    shape.push(channels);
    shape
}

/// The generator `predict_augmenting` would drive for these samples.
pub fn plan_batches(
    samples: &[String],
    image_dir: &Path,
    options: &AugmentingOptions,
    input_shape: &[usize],
) -> EnsembleResult<DataGenerator> {
    let policy = resolve_policy(options.policy.clone(), input_shape)?;
    let generator = DataGenerator::builder(replicate_samples(samples, options.n_cycles), image_dir)
        .config(options.generator_config())
        .policy(Some(policy))
        .subfunctions(options.subfunctions.clone())
        .loader(options.loader.clone())
        .build()?;
    Ok(generator)
}
