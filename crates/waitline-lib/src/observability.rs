//! Observability infrastructure for the wait-time service
//!
//! Provides:
//! - Prometheus metrics (prediction latency, training duration, outcomes, fallbacks)
//! - Structured JSON logging with tracing

use crate::error::TrainFailure;
use crate::models::{DepartmentId, FallbackReason, FeatureVector};
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Histogram, HistogramVec, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for request-path latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Histogram buckets for training duration (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    prediction_latency_seconds: Histogram,
    training_duration_seconds: HistogramVec,
    predictions_total: IntCounterVec,
    fallbacks_total: IntCounterVec,
    training_runs_total: IntCounterVec,
    models_cached: IntGauge,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "waitline_prediction_latency_seconds",
                "Time spent serving a wait-time prediction",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            training_duration_seconds: register_histogram_vec!(
                "waitline_training_duration_seconds",
                "Time spent training a department model",
                &["outcome"],
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            predictions_total: register_int_counter_vec!(
                "waitline_predictions_total",
                "Predictions served, by source",
                &["source"]
            )
            .expect("Failed to register predictions_total"),

            fallbacks_total: register_int_counter_vec!(
                "waitline_fallbacks_total",
                "Predictions served from the fixed fallback, by reason",
                &["reason"]
            )
            .expect("Failed to register fallbacks_total"),

            training_runs_total: register_int_counter_vec!(
                "waitline_training_runs_total",
                "Training attempts, by outcome",
                &["outcome"]
            )
            .expect("Failed to register training_runs_total"),

            models_cached: register_int_gauge!(
                "waitline_models_cached",
                "Number of department models in the model store"
            )
            .expect("Failed to register models_cached"),
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServiceMetrics")
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    pub fn observe_prediction(&self, duration_secs: f64, fallback: Option<FallbackReason>) {
        let inner = self.inner();
        inner.prediction_latency_seconds.observe(duration_secs);
        match fallback {
            Some(reason) => {
                inner.predictions_total.with_label_values(&["fallback"]).inc();
                inner
                    .fallbacks_total
                    .with_label_values(&[reason.as_str()])
                    .inc();
            }
            None => inner.predictions_total.with_label_values(&["model"]).inc(),
        }
    }

    pub fn observe_training(&self, outcome: &str, duration_secs: f64) {
        let inner = self.inner();
        inner
            .training_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
        inner.training_runs_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_models_cached(&self, count: i64) {
        self.inner().models_cached.set(count);
    }
}

/// Structured logger for service events
///
/// Emits consistent JSON fields for predictions, training runs and
/// lifecycle events.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("waitline")
    }
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_prediction(
        &self,
        department: DepartmentId,
        features: &FeatureVector,
        estimated_wait_time: u32,
    ) {
        info!(
            event = "prediction_served",
            instance = %self.instance,
            department_id = %department,
            hour = features.hour,
            day_of_week = features.day_of_week,
            queue_length = features.queue_length,
            estimated_wait_time = estimated_wait_time,
            "Wait time predicted"
        );
    }

    pub fn log_fallback(
        &self,
        department: DepartmentId,
        reason: FallbackReason,
        queue_length: Option<u32>,
        estimated_wait_time: u32,
    ) {
        match reason {
            FallbackReason::InsufficientData => info!(
                event = "fallback_served",
                instance = %self.instance,
                department_id = %department,
                reason = %reason,
                queue_length = ?queue_length,
                estimated_wait_time = estimated_wait_time,
                "Serving fallback wait time"
            ),
            _ => warn!(
                event = "fallback_served",
                instance = %self.instance,
                department_id = %department,
                reason = %reason,
                queue_length = ?queue_length,
                estimated_wait_time = estimated_wait_time,
                "Serving fallback wait time after failure"
            ),
        }
    }

    pub fn log_model_trained(&self, department: DepartmentId, training_rows: usize, elapsed_ms: u128) {
        info!(
            event = "model_trained",
            instance = %self.instance,
            department_id = %department,
            training_rows = training_rows,
            elapsed_ms = elapsed_ms as u64,
            "Department model trained"
        );
    }

    pub fn log_training_skipped(&self, department: DepartmentId, rows: usize, required: usize) {
        info!(
            event = "training_skipped",
            instance = %self.instance,
            department_id = %department,
            rows = rows,
            required = required,
            "Not enough history to train"
        );
    }

    pub fn log_training_failed(&self, department: DepartmentId, failure: &TrainFailure) {
        warn!(
            event = "training_failed",
            instance = %self.instance,
            department_id = %department,
            code = failure.code(),
            error = %failure,
            "Training failed, keeping previous model"
        );
    }

    pub fn log_model_invalidated(&self, department: DepartmentId, existed: bool) {
        info!(
            event = "model_invalidated",
            instance = %self.instance,
            department_id = %department,
            existed = existed,
            "Department model invalidated"
        );
    }

    pub fn log_startup(&self, version: &str, model_dir: &str) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            model_dir = %model_dir,
            "Wait-time service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Wait-time service shutting down"
        );
    }
}
