//! Core data models for the stream controllers

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single message flowing through a channel: field name -> JSON value,
/// in insertion order.
pub type Record = Map<String, Value>;

/// Ordered records buffered for one group in the window cache
pub type WindowBuffer = Vec<Record>;

/// Field-name suffix that marks a result field as an anomaly indicator
pub const DEFAULT_ANOMALY_SUFFIX: &str = "_anomaly";

/// Cache key shared by every record when no group-by fields are configured
pub const UNGROUPED_KEY: &str = "";

/// Prediction service response: one record, or a list of records when the
/// request carried a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionResult {
    Single(Record),
    Batch(Vec<Record>),
}

impl PredictionResult {
    /// Normalize to a sequence of records
    pub fn into_records(self) -> Vec<Record> {
        match self {
            PredictionResult::Single(record) => vec![record],
            PredictionResult::Batch(records) => records,
        }
    }

    /// The representative output of a window prediction: the last record
    pub fn into_last(self) -> Option<Record> {
        self.into_records().pop()
    }
}

/// Payload of a predict call
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum When<'a> {
    Record(&'a Record),
    Window(&'a [Record]),
}

/// Timeseries settings of a predictor, as reported by the prediction service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeseriesSettings {
    #[serde(default)]
    pub is_timeseries: bool,
    #[serde(default)]
    pub window: Option<usize>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub order_by: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub group_by: Vec<String>,
}

/// Accepts `"field"`, `["a", "b"]` or `null`
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(field)) => vec![field],
        Some(OneOrMany::Many(fields)) => fields,
    })
}

/// Final status of a learning job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

/// Status message written to the output channel once a learning job ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub action: String,
    pub predictor: String,
    pub status: JobStatus,
    pub details: String,
}

impl StatusRecord {
    pub fn training(predictor: &str, status: JobStatus, details: impl Into<String>) -> Self {
        Self {
            action: "training".to_string(),
            predictor: predictor.to_string(),
            status,
            details: details.into(),
        }
    }

    pub fn into_record(self) -> Record {
        let mut record = Record::new();
        record.insert("action".into(), Value::String(self.action));
        record.insert("predictor".into(), Value::String(self.predictor));
        let status = match self.status {
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        };
        record.insert("status".into(), Value::String(status.to_string()));
        record.insert("details".into(), Value::String(self.details));
        record
    }
}

/// True when any field ending in `suffix` carries a non-null value
pub fn is_anomaly(record: &Record, suffix: &str) -> bool {
    record
        .iter()
        .any(|(key, value)| key.ends_with(suffix) && !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_prediction_result_single_and_batch() {
        let single: PredictionResult = serde_json::from_value(json!({"y": 1})).unwrap();
        assert_eq!(single.into_records().len(), 1);

        let batch: PredictionResult =
            serde_json::from_value(json!([{"y": 1}, {"y": 2}, {"y": 3}])).unwrap();
        let last = batch.into_last().unwrap();
        assert_eq!(last["y"], json!(3));
    }

    #[test]
    fn test_settings_accept_string_or_list() {
        let settings: TimeseriesSettings = serde_json::from_value(json!({
            "is_timeseries": true,
            "window": 10,
            "order_by": "order",
            "group_by": null
        }))
        .unwrap();

        assert_eq!(settings.order_by, vec!["order".to_string()]);
        assert!(settings.group_by.is_empty());
        assert_eq!(settings.window, Some(10));

        let settings: TimeseriesSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings, TimeseriesSettings::default());
    }

    #[test]
    fn test_is_anomaly() {
        assert!(is_anomaly(&record(json!({"y": 1, "y_anomaly": true})), "_anomaly"));
        assert!(!is_anomaly(&record(json!({"y": 1, "y_anomaly": null})), "_anomaly"));
        assert!(!is_anomaly(&record(json!({"anomaly_y": 1})), "_anomaly"));
    }

    #[test]
    fn test_status_record_shape() {
        let record = StatusRecord::training("p", JobStatus::Error, "boom").into_record();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["action", "predictor", "status", "details"]);
        assert_eq!(record["status"], json!("error"));
    }

    #[test]
    fn test_when_serializes_untagged() {
        let r = record(json!({"x": 1}));
        assert_eq!(serde_json::to_value(When::Record(&r)).unwrap(), json!({"x": 1}));
        let window = vec![r.clone(), r];
        assert_eq!(
            serde_json::to_value(When::Window(&window)).unwrap(),
            json!([{"x": 1}, {"x": 1}])
        );
    }
}
