//! Wait-time prediction service
//!
//! Combines the cached department model with a live queue-length read. A
//! missing model is trained synchronously; concurrent misses for the same
//! department share a single training run. Every failure resolves to the
//! fallback estimate, tagged with the reason.

use super::model::{ModelMetadata, TrainedModel};
use super::model_store::ModelStore;
use super::single_flight::SingleFlight;
use super::trainer::{TrainOutcome, Trainer, TrainingConfig};
use crate::error::{PersistenceError, TrainFailure};
use crate::health::{components, HealthRegistry};
use crate::models::{DepartmentId, FallbackReason, FeatureVector, PredictionResult};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::repository::QueueRepository;
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Wait time served when no model can be used, in minutes
pub const FALLBACK_WAIT_MINUTES: u32 = 30;

/// Configuration for the prediction service
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub fallback_wait_minutes: u32,
    pub training: TrainingConfig,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            fallback_wait_minutes: FALLBACK_WAIT_MINUTES,
            training: TrainingConfig::default(),
        }
    }
}

/// Where the model for a prediction came from
enum ModelSource {
    Ready(Arc<TrainedModel>),
    Unavailable(FallbackReason),
}

/// Value shared by callers of one per-department flight
#[derive(Debug, Clone)]
enum Flight {
    /// The trainer ran
    Trained(TrainOutcome),
    /// A stored model appeared before training started; nothing was fitted
    Reused(Arc<TrainedModel>),
}

/// Serves predictions and explicit retrains for all departments
pub struct WaitTimeService {
    repository: Arc<dyn QueueRepository>,
    store: Arc<dyn ModelStore>,
    trainer: Trainer,
    flights: SingleFlight<DepartmentId, Flight>,
    config: PredictionConfig,
    health: HealthRegistry,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
}

impl WaitTimeService {
    pub fn new(
        repository: Arc<dyn QueueRepository>,
        store: Arc<dyn ModelStore>,
        config: PredictionConfig,
        health: HealthRegistry,
    ) -> Self {
        let trainer = Trainer::new(
            Arc::clone(&repository),
            Arc::clone(&store),
            config.training.clone(),
        );
        Self {
            repository,
            store,
            trainer,
            flights: SingleFlight::new(),
            config,
            health,
            metrics: ServiceMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.trainer = self.trainer.with_logger(logger.clone());
        self.logger = logger;
        self
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Estimate the wait for a new token in `department` booked at `now`
    pub async fn predict(&self, department: DepartmentId, now: NaiveDateTime) -> PredictionResult {
        let start = Instant::now();
        let result = self.predict_inner(department, now).await;
        self.metrics
            .observe_prediction(start.elapsed().as_secs_f64(), result.fallback);
        result
    }

    async fn predict_inner(&self, department: DepartmentId, now: NaiveDateTime) -> PredictionResult {
        let source = self.model_for(department).await;
        let queue_length = self.queue_length(department).await;

        let model = match source {
            ModelSource::Ready(model) => model,
            ModelSource::Unavailable(reason) => return self.fallback(department, reason, queue_length),
        };
        let Some(queue_length) = queue_length else {
            return self.fallback(department, FallbackReason::QueueUnavailable, None);
        };

        let features = FeatureVector::at(now, queue_length);
        let estimated_wait_time = model.estimate_minutes(&features);
        self.logger
            .log_prediction(department, &features, estimated_wait_time);
        PredictionResult::from_model(estimated_wait_time, queue_length)
    }

    /// Train a new model for `department`, replacing the stored one. Joins
    /// a training run already in progress for the department, but never
    /// settles for a flight that only found an existing model.
    pub async fn retrain(&self, department: DepartmentId) -> TrainOutcome {
        loop {
            let flight = self
                .flights
                .run(department, move || async move {
                    Flight::Trained(self.trainer.train(department).await)
                })
                .await;
            if let Flight::Trained(outcome) = flight {
                self.record_training(&outcome).await;
                return outcome;
            }
            debug!(department_id = %department, "Joined a flight that reused a stored model, training again");
        }
    }

    /// Drop the stored model so the next prediction retrains
    pub async fn invalidate(&self, department: DepartmentId) -> Result<bool, PersistenceError> {
        let existed = self.store.invalidate(department).await?;
        self.logger.log_model_invalidated(department, existed);
        self.refresh_model_count().await;
        Ok(existed)
    }

    /// Mark the model store unhealthy when it cannot take writes. Called at
    /// startup; a later successful training clears it.
    pub async fn check_model_store(&self) -> bool {
        match self.store.check_writable().await {
            Ok(()) => {
                self.health.set_healthy(components::MODEL_STORE).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "Model store is not writable");
                self.health
                    .set_unhealthy(components::MODEL_STORE, e.to_string())
                    .await;
                false
            }
        }
    }

    /// Metadata of every stored model
    pub async fn list_models(&self) -> Result<Vec<ModelMetadata>, PersistenceError> {
        let models = self.store.list().await?;
        self.metrics.set_models_cached(models.len() as i64);
        Ok(models)
    }

    async fn model_for(&self, department: DepartmentId) -> ModelSource {
        if let Some(model) = self.cached_model(department).await {
            return ModelSource::Ready(model);
        }

        let flight = self
            .flights
            .run(department, move || async move {
                // Another caller may have stored a model since our miss
                if let Some(model) = self.cached_model(department).await {
                    return Flight::Reused(model);
                }
                Flight::Trained(self.trainer.train(department).await)
            })
            .await;
        let outcome = match flight {
            Flight::Reused(model) => return ModelSource::Ready(model),
            Flight::Trained(outcome) => outcome,
        };
        self.record_training(&outcome).await;

        match outcome {
            TrainOutcome::Trained(model) => ModelSource::Ready(model),
            TrainOutcome::InsufficientData { .. } => {
                ModelSource::Unavailable(FallbackReason::InsufficientData)
            }
            TrainOutcome::Failed(failure) => ModelSource::Unavailable(fallback_reason(&failure)),
        }
    }

    /// Store lookup where a read failure counts as a miss
    async fn cached_model(&self, department: DepartmentId) -> Option<Arc<TrainedModel>> {
        match self.store.get(department).await {
            Ok(model) => model,
            Err(e) => {
                warn!(department_id = %department, error = %e, "Model read failed, treating as cache miss");
                self.health
                    .set_degraded(components::MODEL_STORE, e.to_string())
                    .await;
                None
            }
        }
    }

    async fn queue_length(&self, department: DepartmentId) -> Option<u32> {
        match self.repository.waiting_count(department).await {
            Ok(count) => {
                self.health.set_healthy(components::DATA_STORE).await;
                Some(count)
            }
            Err(e) => {
                warn!(department_id = %department, error = %e, "Failed to read live queue length");
                self.health
                    .set_degraded(components::DATA_STORE, e.to_string())
                    .await;
                None
            }
        }
    }

    fn fallback(
        &self,
        department: DepartmentId,
        reason: FallbackReason,
        queue_length: Option<u32>,
    ) -> PredictionResult {
        let estimated_wait_time = self.config.fallback_wait_minutes;
        self.logger
            .log_fallback(department, reason, queue_length, estimated_wait_time);
        PredictionResult {
            estimated_wait_time,
            queue_length,
            fallback: Some(reason),
        }
    }

    async fn record_training(&self, outcome: &TrainOutcome) {
        match outcome {
            TrainOutcome::Trained(_) => {
                self.health.set_healthy(components::TRAINER).await;
                self.health.set_healthy(components::MODEL_STORE).await;
                self.refresh_model_count().await;
            }
            TrainOutcome::InsufficientData { .. } => {}
            // No model can be kept while writes fail
            TrainOutcome::Failed(TrainFailure::Persistence(message)) => {
                self.health
                    .set_unhealthy(components::MODEL_STORE, message.clone())
                    .await;
            }
            TrainOutcome::Failed(failure) => {
                let component = match failure {
                    TrainFailure::DataAccess(_) => components::DATA_STORE,
                    _ => components::TRAINER,
                };
                self.health.set_degraded(component, failure.to_string()).await;
            }
        }
    }

    async fn refresh_model_count(&self) {
        match self.store.list().await {
            Ok(models) => self.metrics.set_models_cached(models.len() as i64),
            Err(e) => debug!(error = %e, "Could not count stored models"),
        }
    }
}

fn fallback_reason(failure: &TrainFailure) -> FallbackReason {
    match failure {
        TrainFailure::DataAccess(_) => FallbackReason::DataStoreUnavailable,
        TrainFailure::TimedOut(_) => FallbackReason::TrainingTimedOut,
        TrainFailure::Persistence(_) | TrainFailure::Fit(_) => FallbackReason::ModelUnavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::predictor::testing::{base_time, history, waiting, ReadOnlyStore, UnreadableStore};
    use crate::predictor::{ForestConfig, InMemoryModelStore, Regressor};
    use crate::repository::InMemoryQueueRepository;
    use chrono::{Datelike, Timelike};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store that misses on its first read, then serves a model stored
    /// behind the service's back after a delay
    struct LateArrivalStore {
        reads: AtomicUsize,
        late: Arc<TrainedModel>,
        inner: InMemoryModelStore,
    }

    #[async_trait::async_trait]
    impl ModelStore for LateArrivalStore {
        async fn get(&self, department: DepartmentId) -> Result<Option<Arc<TrainedModel>>, PersistenceError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            if let Some(model) = self.inner.get(department).await? {
                return Ok(Some(model));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Some(Arc::clone(&self.late)))
        }

        async fn put(&self, model: Arc<TrainedModel>) -> Result<(), PersistenceError> {
            self.inner.put(model).await
        }

        async fn invalidate(&self, department: DepartmentId) -> Result<bool, PersistenceError> {
            self.inner.invalidate(department).await
        }

        async fn list(&self) -> Result<Vec<ModelMetadata>, PersistenceError> {
            self.inner.list().await
        }
    }

    fn config() -> PredictionConfig {
        PredictionConfig {
            training: TrainingConfig {
                forest: ForestConfig {
                    n_estimators: 10,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn service(
        repository: Arc<InMemoryQueueRepository>,
        store: Arc<InMemoryModelStore>,
    ) -> WaitTimeService {
        WaitTimeService::new(repository, store, config(), HealthRegistry::new())
    }

    fn now() -> NaiveDateTime {
        base_time().with_hour(10).unwrap()
    }

    #[tokio::test]
    async fn test_no_history_serves_fallback() {
        let repository = Arc::new(InMemoryQueueRepository::new());
        let store = Arc::new(InMemoryModelStore::new());
        let service = service(repository, Arc::clone(&store));

        let result = service.predict(DepartmentId(42), now()).await;
        assert_eq!(result.estimated_wait_time, FALLBACK_WAIT_MINUTES);
        assert_eq!(result.fallback, Some(FallbackReason::InsufficientData));
        assert_eq!(result.queue_length, Some(0));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_trains_on_first_use_and_reports_queue_length() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        repository.extend(waiting(1, 3)).await;
        let store = Arc::new(InMemoryModelStore::new());
        let service = service(repository, Arc::clone(&store));

        let result = service.predict(DepartmentId(1), now()).await;
        assert_eq!(result.queue_length, Some(3));
        assert!(!result.is_fallback());

        let model = store.get(DepartmentId(1)).await.unwrap().unwrap();
        let expected = model
            .regressor
            .predict(&[now().hour() as f64, now().weekday().number_from_monday() as f64, 3.0]);
        assert_eq!(result.estimated_wait_time, expected.trunc() as u32);
        assert_eq!(result.estimated_wait_time, 20);
    }

    #[tokio::test]
    async fn test_prediction_is_idempotent() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 15, 12)));
        let store = Arc::new(InMemoryModelStore::new());
        let service = service(repository, Arc::clone(&store));

        let first = service.predict(DepartmentId(1), now()).await;
        let second = service.predict(DepartmentId(1), now()).await;
        assert_eq!(first, second);
        assert_eq!(service.trainer().stats().runs, 1);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_read_failure_serves_fallback() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        let store = Arc::new(InMemoryModelStore::new());
        let service = service(Arc::clone(&repository), Arc::clone(&store));

        // Train while the store is up
        assert!(!service.predict(DepartmentId(1), now()).await.is_fallback());

        repository.set_unavailable(true);
        let result = service.predict(DepartmentId(1), now()).await;
        assert_eq!(result.estimated_wait_time, FALLBACK_WAIT_MINUTES);
        assert_eq!(result.queue_length, None);
        assert_eq!(result.fallback, Some(FallbackReason::QueueUnavailable));

        let health = service.health().health().await;
        assert_eq!(
            health.components[components::DATA_STORE].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_data_store_down_on_first_use() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        repository.set_unavailable(true);
        let store = Arc::new(InMemoryModelStore::new());
        let service = service(repository, Arc::clone(&store));

        let result = service.predict(DepartmentId(1), now()).await;
        assert_eq!(result.estimated_wait_time, FALLBACK_WAIT_MINUTES);
        assert_eq!(result.fallback, Some(FallbackReason::DataStoreUnavailable));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_store_is_a_cache_miss() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        let service = WaitTimeService::new(
            repository,
            Arc::new(UnreadableStore),
            config(),
            HealthRegistry::new(),
        );

        let result = service.predict(DepartmentId(1), now()).await;
        assert!(!result.is_fallback());
        assert_eq!(service.trainer().stats().models_trained, 1);
    }

    #[tokio::test]
    async fn test_unwritable_store_serves_fallback() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        let service = WaitTimeService::new(
            repository,
            Arc::new(ReadOnlyStore),
            config(),
            HealthRegistry::new(),
        );

        let result = service.predict(DepartmentId(1), now()).await;
        assert_eq!(result.fallback, Some(FallbackReason::ModelUnavailable));
        assert_eq!(result.queue_length, Some(0));

        match service.retrain(DepartmentId(1)).await {
            TrainOutcome::Failed(failure) => assert_eq!(failure.code(), "persistence"),
            other => panic!("expected persistence failure, got {:?}", other),
        }
        let health = service.health().health().await;
        assert_eq!(
            health.components[components::MODEL_STORE].status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_unwritable_store_at_startup_is_unhealthy() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        let health = HealthRegistry::with_service_components().await;
        let service = WaitTimeService::new(
            Arc::clone(&repository) as Arc<dyn QueueRepository>,
            Arc::new(ReadOnlyStore),
            config(),
            health.clone(),
        );

        assert!(!service.check_model_store().await);
        health.set_ready(true).await;
        assert_eq!(health.health().await.status, ComponentStatus::Unhealthy);
        assert!(!health.readiness().await.ready);

        // A writable store clears it
        let recovered = WaitTimeService::new(
            repository,
            Arc::new(InMemoryModelStore::new()),
            config(),
            health.clone(),
        );
        assert!(recovered.check_model_store().await);
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_retrain_replaces_model() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        let store = Arc::new(InMemoryModelStore::new());
        let original = service(repository, Arc::clone(&store));

        assert_eq!(original.predict(DepartmentId(1), now()).await.estimated_wait_time, 20);

        // New history with a different wait, then an explicit retrain
        let fresh = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 45)));
        let refreshed = service(fresh, Arc::clone(&store));
        let outcome = refreshed.retrain(DepartmentId(1)).await;
        let retrained = outcome.model().cloned().unwrap();

        let stored = store.get(DepartmentId(1)).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&retrained, &stored));
        assert_eq!(refreshed.predict(DepartmentId(1), now()).await.estimated_wait_time, 45);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retrain_does_not_settle_for_reused_model() {
        let stale = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        let late = Trainer::new(stale, Arc::new(InMemoryModelStore::new()), config().training)
            .train(DepartmentId(1))
            .await
            .model()
            .cloned()
            .unwrap();

        let store = Arc::new(LateArrivalStore {
            reads: AtomicUsize::new(0),
            late: Arc::clone(&late),
            inner: InMemoryModelStore::new(),
        });
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 45)));
        let service = Arc::new(WaitTimeService::new(
            repository,
            Arc::clone(&store) as Arc<dyn ModelStore>,
            config(),
            HealthRegistry::new(),
        ));

        let predicting = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.predict(DepartmentId(1), now()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = service.retrain(DepartmentId(1)).await;
        predicting.await.unwrap();

        let retrained = outcome.model().cloned().unwrap();
        assert!(!Arc::ptr_eq(&retrained, &late));
        assert_eq!(service.trainer().stats().runs, 1);
        let stored = store.inner.get(DepartmentId(1)).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&retrained, &stored));
    }

    #[tokio::test]
    async fn test_invalidate_forces_retraining() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(1, 12, 20)));
        let store = Arc::new(InMemoryModelStore::new());
        let service = service(repository, Arc::clone(&store));

        service.predict(DepartmentId(1), now()).await;
        assert!(service.invalidate(DepartmentId(1)).await.unwrap());
        assert!(store.is_empty());
        assert!(!service.invalidate(DepartmentId(1)).await.unwrap());

        service.predict(DepartmentId(1), now()).await;
        assert_eq!(service.trainer().stats().runs, 2);

        let models = service.list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].department_id, DepartmentId(1));
        assert_eq!(models[0].algorithm, "random_forest");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_train_once() {
        let repository = Arc::new(InMemoryQueueRepository::with_events(history(5, 30, 18)));
        repository.extend(waiting(5, 2)).await;
        let store = Arc::new(InMemoryModelStore::new());
        let service = Arc::new(service(repository, Arc::clone(&store)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.predict(DepartmentId(5), now()).await })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(!result.is_fallback());
            assert_eq!(result.queue_length, Some(2));
            assert_eq!(result.estimated_wait_time, 18);
        }

        assert_eq!(service.trainer().stats().runs, 1);
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.len(), 1);
    }
}
