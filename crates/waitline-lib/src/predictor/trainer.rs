//! Model training for a single department
//!
//! Pulls the department history from the queue repository, aggregates it,
//! fits a forest on the blocking pool under a time budget and writes the
//! result to the model store. Every failure is turned into a
//! [`TrainOutcome`]; nothing is propagated as an error.

use super::features::{FeatureExtractor, MIN_TRAINING_ROWS};
use super::forest::{ForestConfig, RandomForest};
use super::model::{ModelKind, TrainedModel};
use super::model_store::ModelStore;
use crate::error::TrainFailure;
use crate::models::{DepartmentId, TrainingRow};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::repository::QueueRepository;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default time budget for extracting data and fitting a model
pub const DEFAULT_TRAINING_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the trainer
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Minimum hourly buckets before a model is fitted
    pub min_rows: usize,
    pub forest: ForestConfig,
    /// Budget for extraction plus fitting; persisting is not included
    pub timeout: Duration,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_rows: MIN_TRAINING_ROWS,
            forest: ForestConfig::default(),
            timeout: DEFAULT_TRAINING_TIMEOUT,
        }
    }
}

/// Result of a training attempt
#[derive(Debug, Clone)]
pub enum TrainOutcome {
    /// A model was fitted and stored
    Trained(Arc<TrainedModel>),
    /// Not enough history to fit a model; nothing was stored
    InsufficientData { rows: usize, required: usize },
    /// Training did not complete; any previously stored model is untouched
    Failed(TrainFailure),
}

impl TrainOutcome {
    pub fn model(&self) -> Option<&Arc<TrainedModel>> {
        match self {
            TrainOutcome::Trained(model) => Some(model),
            _ => None,
        }
    }

    /// Label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            TrainOutcome::Trained(_) => "trained",
            TrainOutcome::InsufficientData { .. } => "insufficient_data",
            TrainOutcome::Failed(failure) => failure.code(),
        }
    }
}

/// Training statistics
#[derive(Debug, Clone, Default)]
pub struct TrainerStats {
    pub runs: u64,
    pub models_trained: u64,
}

/// Fits and stores per-department models
pub struct Trainer {
    repository: Arc<dyn QueueRepository>,
    store: Arc<dyn ModelStore>,
    extractor: FeatureExtractor,
    config: TrainingConfig,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
    runs: AtomicU64,
    models_trained: AtomicU64,
}

impl Trainer {
    pub fn new(
        repository: Arc<dyn QueueRepository>,
        store: Arc<dyn ModelStore>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            repository,
            store,
            extractor: FeatureExtractor::new(config.min_rows),
            config,
            metrics: ServiceMetrics::new(),
            logger: StructuredLogger::default(),
            runs: AtomicU64::new(0),
            models_trained: AtomicU64::new(0),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn stats(&self) -> TrainerStats {
        TrainerStats {
            runs: self.runs.load(Ordering::Relaxed),
            models_trained: self.models_trained.load(Ordering::Relaxed),
        }
    }

    /// Build training rows for a department from the queue repository
    pub async fn training_rows(&self, department: DepartmentId) -> Result<Vec<TrainingRow>, TrainFailure> {
        let events = self.repository.completed_tokens(department).await?;
        let rows = self.extractor.extract(&events);
        debug!(
            department_id = %department,
            events = events.len(),
            rows = rows.len(),
            "Extracted training rows"
        );
        Ok(rows)
    }

    /// Train and store a new model for `department`
    pub async fn train(&self, department: DepartmentId) -> TrainOutcome {
        let start = Instant::now();
        self.runs.fetch_add(1, Ordering::Relaxed);

        let outcome = self.train_inner(department).await;

        let elapsed = start.elapsed();
        self.metrics
            .observe_training(outcome.label(), elapsed.as_secs_f64());

        match &outcome {
            TrainOutcome::Trained(model) => {
                self.models_trained.fetch_add(1, Ordering::Relaxed);
                self.logger
                    .log_model_trained(department, model.training_rows, elapsed.as_millis());
            }
            TrainOutcome::InsufficientData { rows, required } => {
                self.logger.log_training_skipped(department, *rows, *required);
            }
            TrainOutcome::Failed(failure) => {
                self.logger.log_training_failed(department, failure);
            }
        }

        outcome
    }

    async fn train_inner(&self, department: DepartmentId) -> TrainOutcome {
        let fitted = tokio::time::timeout(self.config.timeout, self.fit(department)).await;

        let model = match fitted {
            Ok(Ok(model)) => model,
            Ok(Err(FitStep::Insufficient(rows))) => {
                return TrainOutcome::InsufficientData {
                    rows,
                    required: self.config.min_rows,
                }
            }
            Ok(Err(FitStep::Failed(failure))) => return TrainOutcome::Failed(failure),
            Err(_) => return TrainOutcome::Failed(TrainFailure::TimedOut(self.config.timeout)),
        };

        let model = Arc::new(model);
        if let Err(e) = self.store.put(Arc::clone(&model)).await {
            return TrainOutcome::Failed(e.into());
        }
        TrainOutcome::Trained(model)
    }

    async fn fit(&self, department: DepartmentId) -> Result<TrainedModel, FitStep> {
        let rows = self
            .training_rows(department)
            .await
            .map_err(FitStep::Failed)?;
        if !self.extractor.has_sufficient_data(&rows) {
            return Err(FitStep::Insufficient(rows.len()));
        }

        let row_count = rows.len();
        let forest_config = self.config.forest.clone();
        // Dropped when the timeout abandons this future, which stops the
        // blocking fit at its next tree
        let guard = CancelOnDrop::default();
        let cancel = Arc::clone(&guard.0);
        let forest = tokio::task::spawn_blocking(move || {
            let inputs: Vec<Vec<f64>> = rows.iter().map(|r| r.inputs().to_vec()).collect();
            let targets: Vec<f64> = rows.iter().map(|r| r.avg_wait_time).collect();
            RandomForest::fit_cancellable(&inputs, &targets, &forest_config, &cancel)
        })
        .await
        .map_err(|e| FitStep::Failed(TrainFailure::Fit(format!("fitting task failed: {}", e))))?
        .map_err(|e| FitStep::Failed(e.into()))?;

        Ok(TrainedModel::new(
            department,
            row_count,
            ModelKind::RandomForest(forest),
        ))
    }
}

/// Early exits of the fitting step
enum FitStep {
    Insufficient(usize),
    Failed(TrainFailure),
}

/// Sets the shared flag when dropped
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
