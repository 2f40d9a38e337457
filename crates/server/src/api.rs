//! HTTP API for predictions, model management, health checks and metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};
use waitline_lib::{
    health::{ComponentStatus, HealthRegistry},
    predictor::{TrainOutcome, WaitTimeService},
    DepartmentId, TrainFailure,
};

/// Source of the current local time for predictions
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WaitTimeService>,
    pub health_registry: HealthRegistry,
    pub clock: Clock,
}

impl AppState {
    pub fn new(service: Arc<WaitTimeService>) -> Self {
        Self {
            health_registry: service.health().clone(),
            service,
            clock: Arc::new(|| chrono::Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub department_id: i64,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

fn message(text: &'static str) -> Response {
    (StatusCode::OK, Json(MessageBody { message: text })).into_response()
}

fn error_response(status: StatusCode, text: impl Into<String>, code: Option<&'static str>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: text.into(),
            code,
        }),
    )
        .into_response()
}

fn failure_status(failure: &TrainFailure) -> StatusCode {
    match failure {
        TrainFailure::DataAccess(_) => StatusCode::SERVICE_UNAVAILABLE,
        TrainFailure::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        TrainFailure::Persistence(_) | TrainFailure::Fit(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wait-time estimate for a department. Always 200; failures are served as
/// the fallback estimate.
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> impl IntoResponse {
    let now = (state.clock)();
    let result = state
        .service
        .predict(DepartmentId(request.department_id), now)
        .await;
    Json(result)
}

async fn retrain(
    State(state): State<Arc<AppState>>,
    Path(department_id): Path<i64>,
) -> Response {
    match state.service.retrain(DepartmentId(department_id)).await {
        TrainOutcome::Trained(_) => message("Model retrained"),
        TrainOutcome::InsufficientData { .. } => {
            error_response(StatusCode::BAD_REQUEST, "Not enough data", None)
        }
        TrainOutcome::Failed(failure) => error_response(
            failure_status(&failure),
            failure.to_string(),
            Some(failure.code()),
        ),
    }
}

async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    match state.service.list_models().await {
        Ok(models) => (StatusCode::OK, Json(models)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list models");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                Some("persistence"),
            )
        }
    }
}

async fn invalidate_model(
    State(state): State<Arc<AppState>>,
    Path(department_id): Path<i64>,
) -> Response {
    match state.service.invalidate(DepartmentId(department_id)).await {
        Ok(true) => message("Model invalidated"),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Model not found", None),
        Err(e) => {
            error!(department_id, error = %e, "Failed to invalidate model");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                Some("persistence"),
            )
        }
    }
}

/// Health check response - returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving fallbacks
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/retrain/:department_id", post(retrain))
        .route("/models", get(list_models))
        .route("/models/:department_id", delete(invalidate_model))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(addr: &str, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
