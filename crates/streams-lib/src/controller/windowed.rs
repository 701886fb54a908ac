//! Windowed, optionally grouped, inference over the window cache
//!
//! Each cycle has two phases. Ingest appends every valid incoming record to
//! its group's buffer. Predict then walks every group whose buffer holds at
//! least `window` records: the buffer is sorted by the order-by fields, the
//! oldest `window` records are sent as one batch, the last element of the
//! result is routed, and the oldest record is dropped. This repeats until the
//! buffer is one record short of a full window.

use super::context::{CycleReport, InferenceContext};
use crate::cache::WindowCache;
use crate::channel::MessageChannel;
use crate::error::{CacheError, ValidationError};
use crate::models::{Record, TimeseriesSettings, When, UNGROUPED_KEY};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Window shape derived from a predictor's timeseries settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowParams {
    pub window: usize,
    pub order_by: Vec<String>,
    pub group_by: Vec<String>,
}

impl TryFrom<&TimeseriesSettings> for WindowParams {
    type Error = ValidationError;

    fn try_from(settings: &TimeseriesSettings) -> Result<Self, Self::Error> {
        let window = match settings.window {
            Some(0) => {
                return Err(ValidationError::InvalidSettings(
                    "window must be at least 1".into(),
                ))
            }
            Some(window) => window,
            None => return Err(ValidationError::InvalidSettings("window is not set".into())),
        };

        if settings.order_by.is_empty() {
            return Err(ValidationError::InvalidSettings("order_by is empty".into()));
        }

        Ok(Self {
            window,
            order_by: settings.order_by.clone(),
            group_by: settings.group_by.clone(),
        })
    }
}

impl WindowParams {
    /// Check that every order-by and group-by field is present
    pub fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        if let Some(field) = self.order_by.iter().find(|f| !record.contains_key(*f)) {
            return Err(ValidationError::MissingOrderBy(field.clone()));
        }
        if let Some(field) = self.group_by.iter().find(|f| !record.contains_key(*f)) {
            return Err(ValidationError::MissingGroupBy(field.clone()));
        }
        Ok(())
    }

    /// Cache key of the record's group: the group-by values as JSON array
    /// text, or the shared empty key without grouping.
    pub fn group_key(&self, record: &Record) -> String {
        if self.group_by.is_empty() {
            return UNGROUPED_KEY.to_string();
        }

        let values = self
            .group_by
            .iter()
            .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
            .collect();
        Value::Array(values).to_string()
    }

    /// Stable ascending sort by the tuple of order-by values
    pub fn sort(&self, buffer: &mut [Record]) {
        buffer.sort_by(|a, b| {
            self.order_by
                .iter()
                .map(|field| compare_values(a.get(field), b.get(field)))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
}

/// Numbers compare numerically, strings and booleans naturally; anything
/// else is treated as equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

pub struct WindowedInference {
    context: Arc<InferenceContext>,
    input: Arc<dyn MessageChannel>,
    cache: Arc<dyn WindowCache>,
    params: WindowParams,
}

impl WindowedInference {
    pub fn new(
        context: Arc<InferenceContext>,
        input: Arc<dyn MessageChannel>,
        cache: Arc<dyn WindowCache>,
        params: WindowParams,
    ) -> Self {
        Self {
            context,
            input,
            cache,
            params,
        }
    }

    /// Run one ingest + predict cycle. A cache failure abandons the rest of
    /// the cycle; staged writes of the failed phase are discarded.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let records = match self.input.read().await {
            Ok(records) => records,
            Err(e) => {
                warn!(controller = %self.context.controller, error = %e, "Failed to read input stream");
                report.channel_errors += 1;
                self.context.record_health(&report, true).await;
                return report;
            }
        };
        report.records = records.len();

        let outcome = match self.ingest(records, &mut report).await {
            Ok(()) => self.predict_ready(&mut report).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            error!(controller = %self.context.controller, error = %e, "Window cache failure, cycle abandoned");
            self.context.metrics.inc_cache_errors();
            report.cache_errors += 1;
        }

        if report.predictions > 0 || report.skipped > 0 {
            debug!(
                controller = %self.context.controller,
                records = report.records,
                skipped = report.skipped,
                predictions = report.predictions,
                outputs = report.outputs,
                anomalies = report.anomalies,
                "Windowed cycle complete"
            );
        }
        self.context.record_health(&report, true).await;
        report
    }

    async fn ingest(&self, records: Vec<Record>, report: &mut CycleReport) -> Result<(), CacheError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.cache.transaction().await?;
        for record in records {
            if let Err(e) = self.params.validate(&record) {
                warn!(controller = %self.context.controller, error = %e, "Skipping record");
                self.context.metrics.inc_validation_errors();
                report.skipped += 1;
                continue;
            }

            let key = self.params.group_key(&record);
            let mut buffer = if tx.contains(&key).await? {
                tx.get(&key).await?
            } else {
                Vec::new()
            };
            buffer.push(record);
            tx.set(&key, buffer).await?;
        }
        tx.commit().await
    }

    async fn predict_ready(&self, report: &mut CycleReport) -> Result<(), CacheError> {
        let window = self.params.window;
        let mut tx = self.cache.transaction().await?;

        let keys = tx.keys().await?;
        self.context.metrics.set_windowed_groups(keys.len() as i64);

        for key in keys {
            let mut buffer = tx.get(&key).await?;
            if buffer.len() < window {
                continue;
            }

            self.params.sort(&mut buffer);
            let group = (!self.params.group_by.is_empty()).then_some(key.as_str());

            while buffer.len() >= window {
                let result = self
                    .context
                    .predict(When::Window(&buffer[..window]), report)
                    .await;

                if let Some(last) = result.and_then(|r| r.into_last()) {
                    self.context.emit(&last, group, report).await;
                }
                buffer.remove(0);
            }

            tx.set(&key, buffer).await?;
        }

        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn params(window: usize, order_by: &[&str], group_by: &[&str]) -> WindowParams {
        WindowParams {
            window,
            order_by: order_by.iter().map(|s| s.to_string()).collect(),
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_params_from_settings() {
        let settings = TimeseriesSettings {
            is_timeseries: true,
            window: Some(5),
            order_by: vec!["t".into()],
            group_by: vec![],
        };
        assert_eq!(WindowParams::try_from(&settings).unwrap(), params(5, &["t"], &[]));

        let zero = TimeseriesSettings {
            window: Some(0),
            ..settings.clone()
        };
        assert!(matches!(
            WindowParams::try_from(&zero),
            Err(ValidationError::InvalidSettings(_))
        ));

        let unordered = TimeseriesSettings {
            order_by: vec![],
            ..settings
        };
        assert!(WindowParams::try_from(&unordered).is_err());
    }

    #[test]
    fn test_validate_reports_missing_field() {
        let p = params(2, &["t"], &["g"]);

        assert!(p.validate(&record(json!({"t": 1, "g": "A"}))).is_ok());
        assert_eq!(
            p.validate(&record(json!({"g": "A"}))),
            Err(ValidationError::MissingOrderBy("t".into()))
        );
        assert_eq!(
            p.validate(&record(json!({"t": 1}))),
            Err(ValidationError::MissingGroupBy("g".into()))
        );
    }

    #[test]
    fn test_group_key() {
        assert_eq!(params(2, &["t"], &[]).group_key(&record(json!({"t": 1}))), "");

        let p = params(2, &["t"], &["g", "n"]);
        let a = p.group_key(&record(json!({"t": 1, "g": "A", "n": 1})));
        let b = p.group_key(&record(json!({"n": 1, "t": 9, "g": "A"})));
        assert_eq!(a, r#"["A",1]"#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sort_by_order_tuple_is_stable() {
        let p = params(2, &["day", "seq"], &[]);
        let mut buffer = vec![
            record(json!({"day": 2, "seq": 1, "id": "a"})),
            record(json!({"day": 1, "seq": 2, "id": "b"})),
            record(json!({"day": 1, "seq": 1, "id": "c"})),
            record(json!({"day": 1, "seq": 1, "id": "d"})),
        ];

        p.sort(&mut buffer);
        let ids: Vec<&str> = buffer.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "d", "b", "a"]);
    }

    #[test]
    fn test_compare_numbers_numerically() {
        assert_eq!(
            compare_values(Some(&json!(9)), Some(&json!(10.5))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!("b")), Some(&json!("a"))),
            Ordering::Greater
        );
        assert_eq!(compare_values(Some(&json!(1)), Some(&json!("1"))), Ordering::Equal);
    }
}
