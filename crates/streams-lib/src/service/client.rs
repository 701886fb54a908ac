//! HTTP client for the prediction service REST API

use super::{records_to_csv, PredictionService, ServiceConfig};
use crate::error::ServiceError;
use crate::models::{PredictionResult, Record, TimeseriesSettings, When};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

pub struct HttpPredictionService {
    client: Client,
    api_root: Url,
    config: ServiceConfig,
}

impl HttpPredictionService {
    /// Create a new client for the service at `config.url`
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        // request bodies set their own content type
        let mut headers = HeaderMap::new();
        if let Some(company_id) = &config.company_id {
            let value = HeaderValue::from_str(company_id)
                .map_err(|e| ServiceError::Decode(format!("invalid company id: {}", e)))?;
            headers.insert("company-id", value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        let api_root = Url::parse(&format!("{}/api/", config.url.trim_end_matches('/')))?;

        Ok(Self {
            client,
            api_root,
            config,
        })
    }

    /// API URL with each of `segments` percent-encoded as one path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.api_root.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn predictor_url(&self, predictor: &str) -> Result<Url, ServiceError> {
        self.endpoint(&["predictors", predictor])
    }

    async fn fetch_settings(&self, predictor: &str) -> Result<TimeseriesSettings, ServiceError> {
        let url = self.predictor_url(predictor)?;
        let response = Self::check(self.client.get(url).send().await?).await?;
        let body: Value = response.json().await?;

        let settings = body
            .pointer("/problem_definition/timeseries_settings")
            .cloned()
            .ok_or_else(|| ServiceError::Decode("missing problem_definition.timeseries_settings".into()))?;

        serde_json::from_value(settings).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    /// Turn a non-success response into `ServiceError::Status`
    async fn check(response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PredictionService for HttpPredictionService {
    async fn exists(&self, predictor: &str) -> bool {
        let url = match self.predictor_url(predictor) {
            Ok(url) => url,
            Err(e) => {
                error!(predictor = %predictor, error = %e, "Invalid predictor URL");
                return false;
            }
        };

        let retry = &self.config.retry;
        for attempt in 1..=retry.max_attempts {
            match self.client.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    debug!(
                        predictor = %predictor,
                        attempt,
                        status = response.status().as_u16(),
                        "Predictor info request returned non-success status"
                    );
                }
                Err(e) => {
                    debug!(predictor = %predictor, attempt, error = %e, "Error getting predictor info");
                }
            }
            tokio::time::sleep(retry.delay).await;
        }

        false
    }

    async fn settings(&self, predictor: &str) -> TimeseriesSettings {
        self.fetch_settings(predictor).await.unwrap_or_else(|e| {
            error!(predictor = %predictor, error = %e, "Unable to get timeseries settings");
            TimeseriesSettings::default()
        })
    }

    async fn predict(&self, predictor: &str, when: When<'_>) -> Result<PredictionResult, ServiceError> {
        let url = self.endpoint(&["predictors", predictor, "predict"])?;
        let body = json!({ "when": when, "format_flag": "dict" });

        let response = Self::check(self.client.post(url).json(&body).send().await?).await?;
        let value: Value = response.json().await?;

        serde_json::from_value(value)
            .map_err(|e| ServiceError::Decode(format!("prediction is not a record or list: {}", e)))
    }

    async fn upload_dataset(&self, name: &str, records: &[Record]) -> Result<(), ServiceError> {
        let url = self.endpoint(&["datasources", name])?;
        let file_name = format!("{}.csv", name);

        let file = Part::bytes(records_to_csv(records).into_bytes())
            .file_name(file_name.clone())
            .mime_str("text/csv")?;
        let form = Form::new()
            .text("source_type", "file")
            .text("source", file_name)
            .text("name", name.to_string())
            .part("file", file);

        Self::check(self.client.put(url).multipart(form).send().await?).await?;
        debug!(dataset = %name, rows = records.len(), "Uploaded training dataset");
        Ok(())
    }

    async fn train(&self, name: &str, params: &Record) -> Result<(), ServiceError> {
        let url = self.predictor_url(name)?;
        Self::check(self.client.put(url).json(params).send().await?).await?;
        Ok(())
    }

    async fn delete_model(&self, name: &str) -> Result<(), ServiceError> {
        let url = self.predictor_url(name)?;
        Self::check(self.client.delete(url).send().await?).await?;
        Ok(())
    }

    async fn rename_model(&self, name: &str, new_name: &str) -> Result<(), ServiceError> {
        let mut url = self.endpoint(&["predictors", name, "rename"])?;
        url.query_pairs_mut().append_pair("new_name", new_name);
        Self::check(self.client.get(url).send().await?).await?;
        Ok(())
    }

    async fn delete_registration(&self, controller: &str) -> Result<(), ServiceError> {
        let url = self.endpoint(&["streams", controller])?;
        Self::check(self.client.delete(url).send().await?).await?;
        Ok(())
    }
}
