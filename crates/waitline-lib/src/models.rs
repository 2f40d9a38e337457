//! Core data models for the wait-time service

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a hospital department. All features, models and caches
/// are partitioned by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentId(pub i64);

impl fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DepartmentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a queue token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

/// One historical token record as stored by the queue data store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub department_id: DepartmentId,
    pub booking_time: NaiveDateTime,
    /// Minutes between booking and service start, once known
    pub actual_wait_time: Option<u32>,
    pub status: TokenStatus,
}

impl QueueEvent {
    /// Only completed tokens with a recorded wait are usable as training examples
    pub fn is_eligible(&self) -> bool {
        self.status == TokenStatus::Completed && self.actual_wait_time.is_some()
    }
}

/// One aggregated (date, hour) bucket of completed tokens for a department
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub hour: u32,
    pub day_of_week: u32,
    pub tokens_count: u32,
    pub avg_wait_time: f64,
}

impl TrainingRow {
    /// Model inputs in training order: hour, day of week, tokens count
    pub fn inputs(&self) -> [f64; FEATURE_COUNT] {
        [
            self.hour as f64,
            self.day_of_week as f64,
            self.tokens_count as f64,
        ]
    }
}

/// Number of model inputs
pub const FEATURE_COUNT: usize = 3;

/// Feature vector for a live prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub hour: u32,
    pub day_of_week: u32,
    pub queue_length: u32,
}

impl FeatureVector {
    pub fn at(now: NaiveDateTime, queue_length: u32) -> Self {
        Self {
            hour: now.hour(),
            day_of_week: day_of_week(&now),
            queue_length,
        }
    }

    pub fn inputs(&self) -> [f64; FEATURE_COUNT] {
        [
            self.hour as f64,
            self.day_of_week as f64,
            self.queue_length as f64,
        ]
    }
}

/// Day of week numbered 1-7 starting on Monday. Both training and
/// prediction go through this function so the numbering cannot drift.
pub fn day_of_week<T: Datelike>(date: &T) -> u32 {
    date.weekday().number_from_monday()
}

/// Why a prediction was served from the fixed fallback instead of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Fewer historical buckets than the training threshold
    InsufficientData,
    /// Historical data could not be read while training
    DataStoreUnavailable,
    /// Training exceeded its time budget
    TrainingTimedOut,
    /// The model was fitted but could not be used or persisted
    ModelUnavailable,
    /// The live queue length could not be read
    QueueUnavailable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::InsufficientData => "insufficient_data",
            FallbackReason::DataStoreUnavailable => "data_store_unavailable",
            FallbackReason::TrainingTimedOut => "training_timed_out",
            FallbackReason::ModelUnavailable => "model_unavailable",
            FallbackReason::QueueUnavailable => "queue_unavailable",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wait-time estimate returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub estimated_wait_time: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
}

impl PredictionResult {
    pub fn from_model(estimated_wait_time: u32, queue_length: u32) -> Self {
        Self {
            estimated_wait_time,
            queue_length: Some(queue_length),
            fallback: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_day_of_week_starts_on_monday() {
        // 2024-01-01 was a Monday
        assert_eq!(day_of_week(&at(2024, 1, 1, 9)), 1);
        assert_eq!(day_of_week(&at(2024, 1, 7, 9)), 7);
    }

    #[test]
    fn test_feature_vector_from_timestamp() {
        let f = FeatureVector::at(at(2024, 1, 3, 14), 4);
        assert_eq!(f.hour, 14);
        assert_eq!(f.day_of_week, 3);
        assert_eq!(f.inputs(), [14.0, 3.0, 4.0]);
    }

    #[test]
    fn test_eligibility() {
        let mut event = QueueEvent {
            department_id: DepartmentId(1),
            booking_time: at(2024, 1, 1, 9),
            actual_wait_time: Some(12),
            status: TokenStatus::Completed,
        };
        assert!(event.is_eligible());

        event.actual_wait_time = None;
        assert!(!event.is_eligible());

        event.actual_wait_time = Some(12);
        event.status = TokenStatus::Waiting;
        assert!(!event.is_eligible());
    }

    #[test]
    fn test_prediction_serialization_omits_empty_fields() {
        let result = PredictionResult {
            estimated_wait_time: 30,
            queue_length: None,
            fallback: Some(FallbackReason::InsufficientData),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["estimated_wait_time"], 30);
        assert!(json.get("queue_length").is_none());
        assert_eq!(json["fallback"], "insufficient_data");

        let json = serde_json::to_value(PredictionResult::from_model(12, 3)).unwrap();
        assert_eq!(json["queue_length"], 3);
        assert!(json.get("fallback").is_none());
    }
}
