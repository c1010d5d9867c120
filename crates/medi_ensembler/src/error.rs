use medi_dataset::DatasetError;
use thiserror::Error;

pub type EnsembleResult<T> = Result<T, EnsembleError>;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("inconsistent predictions: expected {expected}, got {actual}")]
    Consistency { expected: usize, actual: usize },
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("model prediction failed: {0}")]
    Model(#[source] anyhow::Error),
}

impl EnsembleError {
    /// Classify a model failure, surfacing dataset errors raised while the model drained the generator.
    pub(crate) fn from_model(err: anyhow::Error) -> Self {
        match err.downcast::<DatasetError>() {
            Ok(dataset) => EnsembleError::Dataset(dataset),
            Err(other) => EnsembleError::Model(other),
        }
    }
}
