//! Error types shared across the service
//!
//! Expected outcomes such as insufficient training data are not errors and
//! live in [`crate::predictor::TrainOutcome`]. The types here cover faults
//! in the collaborators: the queue data store and the model store.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The historical or live queue store could not answer a query
#[derive(Debug, Error)]
pub enum DataAccessError {
    #[error("queue store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("queue store unavailable: {0}")]
    Unavailable(String),
}

/// Reading or writing a persisted model artifact failed
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model artifact {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to encode model: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Fitting a regressor failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("no training rows")]
    Empty,

    #[error("{inputs} input rows but {targets} targets")]
    LengthMismatch { inputs: usize, targets: usize },

    #[error("training data contains non-finite values")]
    NonFinite,

    #[error("fitting was cancelled")]
    Cancelled,
}

/// Why a training run did not produce a model. Cloneable so concurrent
/// callers waiting on the same run can all receive it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainFailure {
    #[error("data store unavailable: {0}")]
    DataAccess(String),

    #[error("failed to persist model: {0}")]
    Persistence(String),

    #[error("training timed out after {0:?}")]
    TimedOut(Duration),

    #[error("model fitting failed: {0}")]
    Fit(String),
}

impl TrainFailure {
    /// Stable machine-readable code for API responses and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            TrainFailure::DataAccess(_) => "data_access",
            TrainFailure::Persistence(_) => "persistence",
            TrainFailure::TimedOut(_) => "timed_out",
            TrainFailure::Fit(_) => "fit",
        }
    }
}

impl From<DataAccessError> for TrainFailure {
    fn from(e: DataAccessError) -> Self {
        TrainFailure::DataAccess(e.to_string())
    }
}

impl From<PersistenceError> for TrainFailure {
    fn from(e: PersistenceError) -> Self {
        TrainFailure::Persistence(e.to_string())
    }
}

impl From<FitError> for TrainFailure {
    fn from(e: FitError) -> Self {
        TrainFailure::Fit(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes_are_stable() {
        assert_eq!(TrainFailure::DataAccess("x".into()).code(), "data_access");
        assert_eq!(TrainFailure::Persistence("x".into()).code(), "persistence");
        assert_eq!(
            TrainFailure::TimedOut(Duration::from_secs(1)).code(),
            "timed_out"
        );
        assert_eq!(TrainFailure::Fit("x".into()).code(), "fit");
    }

    #[test]
    fn test_conversions_keep_message() {
        let failure: TrainFailure = DataAccessError::Unavailable("connection refused".into()).into();
        assert!(failure.to_string().contains("connection refused"));

        let failure: TrainFailure = FitError::Empty.into();
        assert_eq!(failure, TrainFailure::Fit("no training rows".into()));
    }
}
