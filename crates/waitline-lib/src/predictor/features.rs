//! Feature extraction for model training
//!
//! Aggregates completed queue tokens into hourly buckets. Each bucket is one
//! calendar date and hour of one department, and becomes one training row:
//! hour, day of week and token count as inputs, mean wait time as target.

use crate::models::{day_of_week, QueueEvent, TrainingRow};
use chrono::{NaiveDate, Timelike};
use std::collections::BTreeMap;

/// Minimum number of hourly buckets required to train a model
pub const MIN_TRAINING_ROWS: usize = 10;

#[derive(Debug, Default)]
struct Bucket {
    tokens: u32,
    total_wait: f64,
}

/// Builds training rows from raw queue events
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    min_rows: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(MIN_TRAINING_ROWS)
    }
}

impl FeatureExtractor {
    pub fn new(min_rows: usize) -> Self {
        Self { min_rows }
    }

    pub fn min_rows(&self) -> usize {
        self.min_rows
    }

    pub fn has_sufficient_data(&self, rows: &[TrainingRow]) -> bool {
        rows.len() >= self.min_rows
    }

    /// Aggregate eligible events into training rows ordered by date then
    /// hour. Ineligible events are skipped; no events yields no rows.
    ///
    /// Callers pass the events of a single department.
    pub fn extract(&self, events: &[QueueEvent]) -> Vec<TrainingRow> {
        let mut buckets: BTreeMap<(NaiveDate, u32), Bucket> = BTreeMap::new();

        for event in events {
            let Some(wait) = event.actual_wait_time.filter(|_| event.is_eligible()) else {
                continue;
            };
            let key = (event.booking_time.date(), event.booking_time.hour());
            let bucket = buckets.entry(key).or_default();
            bucket.tokens += 1;
            bucket.total_wait += wait as f64;
        }

        buckets
            .into_iter()
            .map(|((date, hour), bucket)| TrainingRow {
                hour,
                day_of_week: day_of_week(&date),
                tokens_count: bucket.tokens,
                avg_wait_time: bucket.total_wait / bucket.tokens as f64,
            })
            .collect()
    }
}
