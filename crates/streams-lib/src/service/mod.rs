//! Prediction service client
//!
//! This module provides:
//! - The `PredictionService` trait the controllers depend on
//! - An HTTP/JSON implementation with a retried existence check
//! - CSV encoding of collected records for dataset uploads

mod client;
mod dataset;

pub use client::HttpPredictionService;
pub use dataset::records_to_csv;

use crate::error::ServiceError;
use crate::models::{PredictionResult, Record, TimeseriesSettings, When};
use async_trait::async_trait;
use std::time::Duration;

/// Default prediction service location
pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:47334";

/// Retry policy for the existence check
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Fixed delay after each failed attempt
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Connection settings for the prediction service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL, without the `/api` suffix
    pub url: String,
    /// Tenant identifier sent as the `company-id` header
    pub company_id: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Existence check retry policy
    pub retry: RetryConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVICE_URL.to_string(),
            company_id: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Operations the controllers need from the prediction service
#[async_trait]
pub trait PredictionService: Send + Sync {
    /// Check whether `predictor` exists, retrying transient failures
    async fn exists(&self, predictor: &str) -> bool;

    /// Fetch timeseries settings; falls back to "not timeseries"
    async fn settings(&self, predictor: &str) -> TimeseriesSettings;

    /// Predict for a single record or a window of records
    async fn predict(&self, predictor: &str, when: When<'_>) -> Result<PredictionResult, ServiceError>;

    /// Upload records as a named training dataset
    async fn upload_dataset(&self, name: &str, records: &[Record]) -> Result<(), ServiceError>;

    /// Create or retrain a model with the given training parameters
    async fn train(&self, name: &str, params: &Record) -> Result<(), ServiceError>;

    async fn delete_model(&self, name: &str) -> Result<(), ServiceError>;

    async fn rename_model(&self, name: &str, new_name: &str) -> Result<(), ServiceError>;

    /// Remove a controller's own registration record
    async fn delete_registration(&self, controller: &str) -> Result<(), ServiceError>;
}
