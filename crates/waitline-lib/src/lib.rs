//! Core library for queue wait-time prediction
//!
//! This crate provides the core functionality for:
//! - Reading queue history and live queue length from the relational store
//! - Aggregating history into hourly training rows
//! - Training and caching per-department random forest models
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod repository;

pub use error::{DataAccessError, FitError, PersistenceError, TrainFailure};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
