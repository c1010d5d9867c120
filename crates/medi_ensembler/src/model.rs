//! Model capability consumed by the ensembler.

use anyhow::bail;
use medi_dataset::{Batch, DataGenerator};
use ndarray::{Array2, ArrayView2, Axis};

/// A trained model that scores every item a generator emits.
pub trait Predictor {
    /// Shape of one input sample without the batch axis, e.g. `[224, 224, 3]`.
    fn input_shape(&self) -> &[usize];

    /// Drain `batches` and return one prediction row per item, in emission order.
    fn predict(&self, batches: &mut DataGenerator) -> anyhow::Result<Array2<f32>>;
}

/// Adapts a per-batch forward function into a [`Predictor`].
pub struct BatchPredictor<F> {
    input_shape: Vec<usize>,
    forward: F,
}

impl<F> BatchPredictor<F>
where
    F: Fn(&Batch) -> anyhow::Result<Array2<f32>>,
{
    pub fn new(input_shape: impl Into<Vec<usize>>, forward: F) -> Self {
        Self {
            input_shape: input_shape.into(),
            forward,
        }
    }
}

impl<F> Predictor for BatchPredictor<F>
where
    F: Fn(&Batch) -> anyhow::Result<Array2<f32>>,
{
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn predict(&self, batches: &mut DataGenerator) -> anyhow::Result<Array2<f32>> {
        let mut outputs = Vec::with_capacity(batches.len());
        for batch in batches.by_ref() {
            let batch = batch?;
            let scores = (self.forward)(&batch)?;
            if scores.nrows() != batch.len() {
                bail!(
                    "forward returned {} rows for a batch of {}",
                    scores.nrows(),
                    batch.len()
                );
            }
            outputs.push(scores);
        }
        if outputs.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        let views: Vec<ArrayView2<'_, f32>> = outputs.iter().map(|o| o.view()).collect();
        Ok(ndarray::concatenate(Axis(0), &views)?)
    }
}
