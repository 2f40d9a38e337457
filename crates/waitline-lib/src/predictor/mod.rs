//! Wait-time prediction engine

mod features;
mod forest;
mod model;
mod model_store;
mod service;
mod single_flight;
mod trainer;

#[cfg(test)]
mod testing;

pub use features::{FeatureExtractor, MIN_TRAINING_ROWS};
pub use forest::{
    ForestConfig, RandomForest, RegressionTree, DEFAULT_N_ESTIMATORS, DEFAULT_SEED,
};
pub use model::{ModelKind, ModelMetadata, TrainedModel};
pub use model_store::{
    compute_checksum, decode_artifact, encode_artifact, FsModelStore, InMemoryModelStore,
    ModelStore,
};
pub use service::{PredictionConfig, WaitTimeService, FALLBACK_WAIT_MINUTES};
pub use single_flight::SingleFlight;
pub use trainer::{
    TrainOutcome, Trainer, TrainerStats, TrainingConfig, DEFAULT_TRAINING_TIMEOUT,
};

/// A fitted model mapping a feature row to an estimated wait in minutes
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &[f64]) -> f64;

    /// Algorithm name recorded in model metadata
    fn name(&self) -> &'static str;
}
