//! Routing of prediction results to the output or anomaly channel

use crate::channel::MessageChannel;
use crate::error::ChannelError;
use crate::models::{is_anomaly, Record, DEFAULT_ANOMALY_SUFFIX};
use std::sync::Arc;

/// Where a result was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Output,
    Anomaly,
}

/// Writes each result to exactly one channel: the anomaly channel when one
/// is configured and the result is flagged, the output channel otherwise.
#[derive(Clone)]
pub struct AnomalyRouter {
    output: Arc<dyn MessageChannel>,
    anomaly: Option<Arc<dyn MessageChannel>>,
    suffix: String,
}

impl AnomalyRouter {
    pub fn new(output: Arc<dyn MessageChannel>, anomaly: Option<Arc<dyn MessageChannel>>) -> Self {
        Self {
            output,
            anomaly,
            suffix: DEFAULT_ANOMALY_SUFFIX.to_string(),
        }
    }

    /// Override the field-name suffix that marks an anomaly indicator
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn destination(&self, record: &Record) -> Destination {
        if self.anomaly.is_some() && is_anomaly(record, &self.suffix) {
            Destination::Anomaly
        } else {
            Destination::Output
        }
    }

    pub async fn route(&self, record: &Record) -> Result<Destination, ChannelError> {
        let destination = self.destination(record);
        let channel = match (&self.anomaly, destination) {
            (Some(anomaly), Destination::Anomaly) => anomaly,
            _ => &self.output,
        };
        channel.write(record).await?;
        Ok(destination)
    }
}
