//! Record-at-a-time inference

use super::context::{CycleReport, InferenceContext};
use crate::channel::MessageChannel;
use crate::models::When;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RealtimeInference {
    context: Arc<InferenceContext>,
    input: Arc<dyn MessageChannel>,
}

impl RealtimeInference {
    pub fn new(context: Arc<InferenceContext>, input: Arc<dyn MessageChannel>) -> Self {
        Self { context, input }
    }

    /// Predict on every record currently in the input channel and route
    /// each element of the result.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let records = match self.input.read().await {
            Ok(records) => records,
            Err(e) => {
                warn!(controller = %self.context.controller, error = %e, "Failed to read input stream");
                report.channel_errors += 1;
                self.context.record_health(&report, false).await;
                return report;
            }
        };
        report.records = records.len();

        for record in &records {
            if let Some(result) = self.context.predict(When::Record(record), &mut report).await {
                for item in result.into_records() {
                    self.context.emit(&item, None, &mut report).await;
                }
            }
        }

        if report.records > 0 {
            debug!(
                controller = %self.context.controller,
                records = report.records,
                outputs = report.outputs,
                anomalies = report.anomalies,
                errors = report.errors,
                "Realtime cycle complete"
            );
        }
        self.context.record_health(&report, false).await;
        report
    }
}
