//! Server configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use waitline_lib::predictor::{
    ForestConfig, PredictionConfig, TrainingConfig, DEFAULT_N_ESTIMATORS, DEFAULT_SEED,
    FALLBACK_WAIT_MINUTES, MIN_TRAINING_ROWS,
};

/// Service configuration
///
/// Read from an optional `waitline.toml` in the working directory, then from
/// `WAITLINE_*` environment variables. `database_url` has no default.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// MySQL connection string, e.g. `mysql://user:pass@db:3306/hospital`
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Directory holding one model artifact per department
    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    #[serde(default = "default_min_training_rows")]
    pub min_training_rows: usize,

    #[serde(default = "default_fallback_wait_minutes")]
    pub fallback_wait_minutes: u32,

    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default = "default_training_timeout_secs")]
    pub training_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_model_dir() -> String {
    "models".to_string()
}

fn default_min_training_rows() -> usize {
    MIN_TRAINING_ROWS
}

fn default_fallback_wait_minutes() -> u32 {
    FALLBACK_WAIT_MINUTES
}

fn default_n_estimators() -> usize {
    DEFAULT_N_ESTIMATORS
}

fn default_random_seed() -> u64 {
    DEFAULT_SEED
}

fn default_training_timeout_secs() -> u64 {
    30
}

impl ServiceConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("waitline").required(false))
            .add_source(config::Environment::with_prefix("WAITLINE").try_parsing(true));
        Self::from_builder(builder)
    }

    pub fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: ServiceConfig = builder
            .build()?
            .try_deserialize()
            .context("invalid configuration (is WAITLINE_DATABASE_URL set?)")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            bail!("database_url must not be empty");
        }
        if self.n_estimators == 0 {
            bail!("n_estimators must be at least 1");
        }
        if self.training_timeout_secs == 0 {
            bail!("training_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn forest_config(&self) -> ForestConfig {
        ForestConfig {
            n_estimators: self.n_estimators,
            seed: self.random_seed,
            max_depth: self.max_depth,
            ..Default::default()
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            min_rows: self.min_training_rows,
            forest: self.forest_config(),
            timeout: Duration::from_secs(self.training_timeout_secs),
        }
    }

    pub fn prediction_config(&self) -> PredictionConfig {
        PredictionConfig {
            fallback_wait_minutes: self.fallback_wait_minutes,
            training: self.training_config(),
        }
    }
}
