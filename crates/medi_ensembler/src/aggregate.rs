//! Aggregation strategies that reduce per-cycle predictions of one sample to a single vector.

use crate::error::{EnsembleError, EnsembleResult};
use ndarray::{Array1, ArrayView2, Axis};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Reduces a `(n_cycles, n_classes)` subset to an `(n_classes,)` vector.
pub trait AggregateFunction: Send + Sync {
    fn aggregate(&self, subset: ArrayView2<'_, f32>) -> Array1<f32>;
}

impl<F> AggregateFunction for F
where
    F: Fn(ArrayView2<'_, f32>) -> Array1<f32> + Send + Sync,
{
    fn aggregate(&self, subset: ArrayView2<'_, f32>) -> Array1<f32> {
        self(subset)
    }
}

/// Element-wise average over cycles.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

impl AggregateFunction for Mean {
    fn aggregate(&self, subset: ArrayView2<'_, f32>) -> Array1<f32> {
        subset
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(subset.ncols()))
    }
}

/// Element-wise median over cycles. Even cycle counts average the two middle values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Median;

impl AggregateFunction for Median {
    fn aggregate(&self, subset: ArrayView2<'_, f32>) -> Array1<f32> {
        subset
            .columns()
            .into_iter()
            .map(|col| {
                let mut values = col.to_vec();
                if values.is_empty() {
                    return 0.0;
                }
                values.sort_by(f32::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            })
            .collect()
    }
}

/// One-hot vector of the class most often predicted (arg-max) across cycles.
///
/// Ties, both within a row and between vote counts, go to the lowest class index.
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityVote;

impl AggregateFunction for MajorityVote {
    fn aggregate(&self, subset: ArrayView2<'_, f32>) -> Array1<f32> {
        let mut votes = vec![0usize; subset.ncols()];
        for row in subset.rows() {
            if let Some(class) = first_argmax(row.iter().copied()) {
                votes[class] += 1;
            }
        }
        let mut out = Array1::zeros(subset.ncols());
        if subset.nrows() > 0 {
            if let Some(winner) = first_argmax(votes.iter().map(|&v| v as f32)) {
                out[winner] = 1.0;
            }
        }
        out
    }
}

/// Sum scores across cycles, then softmax-normalize the summed vector.
///
/// Sums accumulate in `f64` so finite `f32` scores cannot overflow. If a column still
/// sums to `+inf` (infinite input scores), the mass is split evenly over those columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct Softmax;

impl AggregateFunction for Softmax {
    fn aggregate(&self, subset: ArrayView2<'_, f32>) -> Array1<f32> {
        let summed: Vec<f64> = subset
            .columns()
            .into_iter()
            .map(|col| col.iter().map(|&v| f64::from(v)).sum::<f64>())
            .collect();
        let n_inf = summed.iter().filter(|v| **v == f64::INFINITY).count();
        if n_inf > 0 {
            let share = 1.0 / n_inf as f32;
            return summed
                .iter()
                .map(|v| if *v == f64::INFINITY { share } else { 0.0 })
                .collect();
        }
        let max = summed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            // Empty or all `-inf` sums: fall back to uniform.
            let uniform = 1.0 / summed.len().max(1) as f32;
            return Array1::from_elem(summed.len(), uniform);
        }
        let exp: Vec<f64> = summed.iter().map(|v| (v - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        exp.iter().map(|v| (v / total) as f32).collect()
    }
}

fn first_argmax(values: impl Iterator<Item = f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in values.enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Name -> strategy mapping. Built up front, read-only while predicting.
#[derive(Clone)]
pub struct AggregateRegistry {
    entries: BTreeMap<String, Arc<dyn AggregateFunction>>,
}

impl AggregateRegistry {
    /// Registry with `mean`, `median`, `majority_vote` and `softmax`.
    pub fn builtin() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
        .with("mean", Arc::new(Mean))
        .with("median", Arc::new(Median))
        .with("majority_vote", Arc::new(MajorityVote))
        .with("softmax", Arc::new(Softmax))
    }

    /// Shared process-wide copy of [`AggregateRegistry::builtin`].
    pub fn global() -> &'static AggregateRegistry {
        static GLOBAL: OnceLock<AggregateRegistry> = OnceLock::new();
        GLOBAL.get_or_init(AggregateRegistry::builtin)
    }

    /// Register (or replace) a strategy under `name`.
    pub fn with(mut self, name: impl Into<String>, function: Arc<dyn AggregateFunction>) -> Self {
        self.entries.insert(name.into(), function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AggregateFunction>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Aggregation strategy chosen by the caller: a registry name or a ready instance.
#[derive(Clone)]
pub enum Aggregate {
    Named(String),
    Instance(Arc<dyn AggregateFunction>),
}

impl Aggregate {
    /// Look the strategy up by name, or hand back the supplied instance unchanged.
    pub fn resolve(&self, registry: &AggregateRegistry) -> EnsembleResult<Arc<dyn AggregateFunction>> {
        match self {
            Aggregate::Instance(function) => Ok(Arc::clone(function)),
            Aggregate::Named(name) => registry.get(name).ok_or_else(|| {
                let known: Vec<&str> = registry.names().collect();
                EnsembleError::Configuration(format!(
                    "unknown aggregate function \"{name}\" (known: {})",
                    known.join(", ")
                ))
            }),
        }
    }
}

impl Default for Aggregate {
    fn default() -> Self {
        Aggregate::Named("mean".into())
    }
}

impl From<&str> for Aggregate {
    fn from(name: &str) -> Self {
        Aggregate::Named(name.to_string())
    }
}

impl From<String> for Aggregate {
    fn from(name: String) -> Self {
        Aggregate::Named(name)
    }
}

impl From<Arc<dyn AggregateFunction>> for Aggregate {
    fn from(function: Arc<dyn AggregateFunction>) -> Self {
        Aggregate::Instance(function)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Named(name) => f.write_str(name),
            Aggregate::Instance(_) => f.write_str("<custom>"),
        }
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Aggregate::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn mean_and_median_are_identity_for_one_cycle() {
        let row = arr2(&[[0.1f32, 0.7, 0.2]]);
        assert_eq!(Mean.aggregate(row.view()), arr1(&[0.1f32, 0.7, 0.2]));
        assert_eq!(Median.aggregate(row.view()), arr1(&[0.1f32, 0.7, 0.2]));
    }

    #[test]
    fn median_averages_middle_values() {
        let subset = arr2(&[[1.0f32, 5.0], [3.0, 1.0], [2.0, 4.0], [10.0, 2.0]]);
        assert_eq!(Median.aggregate(subset.view()), arr1(&[2.5f32, 3.0]));
    }

    #[test]
    fn majority_vote_picks_dominant_class() {
        let subset = arr2(&[[0.1f32, 0.8, 0.1], [0.2, 0.5, 0.3], [0.6, 0.3, 0.1]]);
        assert_eq!(
            MajorityVote.aggregate(subset.view()),
            arr1(&[0.0f32, 1.0, 0.0])
        );
    }

    #[test]
    fn majority_vote_tie_goes_to_lowest_class() {
        let subset = arr2(&[[0.1f32, 0.2, 0.7], [0.9, 0.05, 0.05]]);
        assert_eq!(
            MajorityVote.aggregate(subset.view()),
            arr1(&[1.0f32, 0.0, 0.0])
        );
        // Equal scores within one row vote for the lower index.
        let subset = arr2(&[[0.5f32, 0.5]]);
        assert_eq!(MajorityVote.aggregate(subset.view()), arr1(&[1.0f32, 0.0]));
    }

    #[test]
    fn softmax_is_a_distribution() {
        let subset = arr2(&[[2.0f32, -1.0, 0.5], [40.0, 3.0, -8.0]]);
        let out = Softmax.aggregate(subset.view());
        assert!((out.sum() - 1.0).abs() < 1e-5);
        assert!(out.iter().all(|v| *v >= 0.0));
        assert!(out[0] > out[1] && out[1] > out[2]);

        // Column sums beyond f32::MAX still normalize.
        let subset = arr2(&[[3.0e38f32, 0.0], [3.0e38, 0.0]]);
        let out = Softmax.aggregate(subset.view());
        assert!((out.sum() - 1.0).abs() < 1e-5);
        assert!(out.iter().all(|v| *v >= 0.0));
        assert!((out[0] - 1.0).abs() < 1e-6);

        let subset = arr2(&[[f32::INFINITY, 1.0, f32::INFINITY]]);
        assert_eq!(Softmax.aggregate(subset.view()), arr1(&[0.5f32, 0.0, 0.5]));
    }

    #[test]
    fn unknown_name_is_a_configuration_error() {
        let registry = AggregateRegistry::builtin();
        let err = Aggregate::from("bogus").resolve(&registry).err().unwrap();
        assert!(matches!(err, EnsembleError::Configuration(msg) if msg.contains("bogus")));
        assert_eq!(registry.names().count(), 4);
    }

    #[test]
    fn instances_and_registered_functions_resolve() {
        let max = |subset: ArrayView2<'_, f32>| subset.fold_axis(Axis(0), f32::MIN, |a, b| a.max(*b));
        let registry = AggregateRegistry::builtin().with("max", Arc::new(max));
        let subset = arr2(&[[1.0f32, 0.0], [0.0, 3.0]]);

        let named = Aggregate::from("max").resolve(&registry).unwrap();
        assert_eq!(named.aggregate(subset.view()), arr1(&[1.0f32, 3.0]));

        let instance: Arc<dyn AggregateFunction> = Arc::new(Softmax);
        let resolved = Aggregate::from(Arc::clone(&instance))
            .resolve(&AggregateRegistry::builtin())
            .unwrap();
        assert!(Arc::ptr_eq(&resolved, &instance));
    }
}
