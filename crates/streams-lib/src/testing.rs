//! In-process test doubles for the prediction service and channels

use crate::channel::MessageChannel;
use crate::error::{ChannelError, ServiceError};
use crate::models::{PredictionResult, Record, TimeseriesSettings, When};
use crate::service::PredictionService;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io;
use std::sync::Mutex;

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

/// A call received by [`MockService`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Exists(String),
    Settings(String),
    Predict { predictor: String, when: Value },
    Upload { name: String, rows: usize },
    Train { name: String, params: Record },
    Delete(String),
    Rename { from: String, to: String },
    DeleteRegistration(String),
}

type Responder = Box<dyn Fn(&Value) -> Result<PredictionResult, ServiceError> + Send + Sync>;

/// Prediction service double that records every call. Predict echoes its
/// input unless a responder is set.
pub struct MockService {
    exists: bool,
    settings: TimeseriesSettings,
    responder: Option<Responder>,
    failing: HashSet<&'static str>,
    calls: Mutex<Vec<Call>>,
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockService {
    pub fn new() -> Self {
        Self {
            exists: true,
            settings: TimeseriesSettings::default(),
            responder: None,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    pub fn with_settings(mut self, settings: TimeseriesSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&Value) -> Result<PredictionResult, ServiceError> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Make an operation (`predict`, `upload`, `train`, `delete`, `rename`,
    /// `delete_registration`) fail with a 500
    pub fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn predict_calls(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Predict { when, .. } => Some(when),
                _ => None,
            })
            .collect()
    }

    fn record_call(&self, call: Call, operation: &'static str) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(operation) {
            return Err(ServiceError::Status {
                status: 500,
                body: format!("{} failed", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PredictionService for MockService {
    async fn exists(&self, predictor: &str) -> bool {
        self.calls.lock().unwrap().push(Call::Exists(predictor.to_string()));
        self.exists
    }

    async fn settings(&self, predictor: &str) -> TimeseriesSettings {
        self.calls.lock().unwrap().push(Call::Settings(predictor.to_string()));
        self.settings.clone()
    }

    async fn predict(&self, predictor: &str, when: When<'_>) -> Result<PredictionResult, ServiceError> {
        let payload = serde_json::to_value(when).unwrap();
        self.record_call(
            Call::Predict {
                predictor: predictor.to_string(),
                when: payload.clone(),
            },
            "predict",
        )?;

        match &self.responder {
            Some(responder) => responder(&payload),
            None => Ok(serde_json::from_value(payload).unwrap()),
        }
    }

    async fn upload_dataset(&self, name: &str, records: &[Record]) -> Result<(), ServiceError> {
        self.record_call(
            Call::Upload {
                name: name.to_string(),
                rows: records.len(),
            },
            "upload",
        )
    }

    async fn train(&self, name: &str, params: &Record) -> Result<(), ServiceError> {
        self.record_call(
            Call::Train {
                name: name.to_string(),
                params: params.clone(),
            },
            "train",
        )
    }

    async fn delete_model(&self, name: &str) -> Result<(), ServiceError> {
        self.record_call(Call::Delete(name.to_string()), "delete")
    }

    async fn rename_model(&self, name: &str, new_name: &str) -> Result<(), ServiceError> {
        self.record_call(
            Call::Rename {
                from: name.to_string(),
                to: new_name.to_string(),
            },
            "rename",
        )
    }

    async fn delete_registration(&self, controller: &str) -> Result<(), ServiceError> {
        self.record_call(
            Call::DeleteRegistration(controller.to_string()),
            "delete_registration",
        )
    }
}

/// Channel whose writes always fail
pub struct BrokenChannel;

#[async_trait]
impl MessageChannel for BrokenChannel {
    async fn read(&self) -> Result<Vec<Record>, ChannelError> {
        Ok(Vec::new())
    }

    async fn write(&self, _record: &Record) -> Result<(), ChannelError> {
        Err(ChannelError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed")))
    }

    fn describe(&self) -> String {
        "BrokenChannel".to_string()
    }
}

/// Predict responder that echoes its input as a batch, each record marked `predicted`
pub fn mark_predicted(payload: &Value) -> Result<PredictionResult, ServiceError> {
    let items = match payload {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    let results = items
        .into_iter()
        .map(|item| {
            let mut out = record(item);
            out.insert("predicted".into(), json!(true));
            out
        })
        .collect();
    Ok(PredictionResult::Batch(results))
}
