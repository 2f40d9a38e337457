//! Trained per-department models

use super::forest::RandomForest;
use super::Regressor;
use crate::models::{DepartmentId, FeatureVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fitted regressor behind a model. New algorithms are added as variants;
/// callers only see the [`Regressor`] interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ModelKind {
    RandomForest(RandomForest),
}

impl Regressor for ModelKind {
    fn predict(&self, features: &[f64]) -> f64 {
        match self {
            ModelKind::RandomForest(forest) => forest.predict(features),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ModelKind::RandomForest(forest) => forest.name(),
        }
    }
}

/// Descriptive information about a stored model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub department_id: DepartmentId,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub algorithm: String,
}

/// A model fitted for one department. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub department_id: DepartmentId,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub regressor: ModelKind,
}

impl TrainedModel {
    pub fn new(department_id: DepartmentId, training_rows: usize, regressor: ModelKind) -> Self {
        Self {
            department_id,
            trained_at: Utc::now(),
            training_rows,
            regressor,
        }
    }

    /// Raw model output in minutes for a live feature vector
    pub fn estimate(&self, features: &FeatureVector) -> f64 {
        self.regressor.predict(&features.inputs())
    }

    /// Estimate truncated toward zero to whole minutes, never negative
    pub fn estimate_minutes(&self, features: &FeatureVector) -> u32 {
        let raw = self.estimate(features);
        if raw.is_nan() || raw <= 0.0 {
            return 0;
        }
        raw.trunc() as u32
    }

    pub fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            department_id: self.department_id,
            trained_at: self.trained_at,
            training_rows: self.training_rows,
            algorithm: self.regressor.name().to_string(),
        }
    }
}
