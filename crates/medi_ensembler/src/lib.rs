//! Test-time augmentation ensembling for medical image classifiers.
//!
//! A trained [`Predictor`] scores `n_cycles` randomly augmented copies of every
//! sample; an aggregation strategy reduces each sample's block of predictions
//! back to one row.

pub mod aggregate;
pub mod augmenting;
pub mod error;
pub mod model;

pub use aggregate::{
    Aggregate, AggregateFunction, AggregateRegistry, MajorityVote, Mean, Median, Softmax,
};
pub use augmenting::{
    predict_augmenting, predict_augmenting_with_registry, replicate_samples, resolve_policy,
    AugmentingOptions, DEFAULT_N_CYCLES,
};
pub use error::{EnsembleError, EnsembleResult};
pub use model::{BatchPredictor, Predictor};

pub mod prelude {
    pub use crate::aggregate::{Aggregate, AggregateFunction, AggregateRegistry};
    pub use crate::augmenting::{predict_augmenting, AugmentingOptions};
    pub use crate::error::{EnsembleError, EnsembleResult};
    pub use crate::model::{BatchPredictor, Predictor};
}
