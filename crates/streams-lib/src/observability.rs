//! Observability infrastructure for the stream controllers
//!
//! Provides:
//! - Prometheus metrics (prediction latency, routed results, per-stage error counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for prediction round trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<StreamMetricsInner> = OnceLock::new();

struct StreamMetricsInner {
    prediction_latency_seconds: HistogramVec,
    predictions: IntCounterVec,
    anomalies: IntCounterVec,
    prediction_errors: IntCounterVec,
    write_errors: IntCounterVec,
    validation_errors: IntCounterVec,
    cache_errors: IntCounterVec,
    windowed_groups: IntGaugeVec,
}

impl StreamMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram_vec!(
                "stream_controller_prediction_latency_seconds",
                "Round trip time of predict calls",
                &["controller"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions: register_int_counter_vec!(
                "stream_controller_predictions_total",
                "Prediction results written to the output channel",
                &["controller"]
            )
            .expect("Failed to register predictions_total"),

            anomalies: register_int_counter_vec!(
                "stream_controller_anomalies_total",
                "Prediction results written to the anomaly channel",
                &["controller"]
            )
            .expect("Failed to register anomalies_total"),

            prediction_errors: register_int_counter_vec!(
                "stream_controller_prediction_errors_total",
                "Failed predict calls",
                &["controller"]
            )
            .expect("Failed to register prediction_errors_total"),

            write_errors: register_int_counter_vec!(
                "stream_controller_write_errors_total",
                "Results dropped because a channel write failed",
                &["controller"]
            )
            .expect("Failed to register write_errors_total"),

            validation_errors: register_int_counter_vec!(
                "stream_controller_validation_errors_total",
                "Records skipped for missing order-by or group-by fields",
                &["controller"]
            )
            .expect("Failed to register validation_errors_total"),

            cache_errors: register_int_counter_vec!(
                "stream_controller_cache_errors_total",
                "Cycles abandoned because of a window cache failure",
                &["controller"]
            )
            .expect("Failed to register cache_errors_total"),

            windowed_groups: register_int_gauge_vec!(
                "stream_controller_windowed_groups",
                "Groups currently buffered in the window cache",
                &["controller"]
            )
            .expect("Failed to register windowed_groups"),
        }
    }
}

/// Per-controller handle to the global Prometheus metrics
///
/// Clones share the same underlying metrics; every series is labelled with
/// the controller name.
#[derive(Clone)]
pub struct StreamMetrics {
    controller: String,
}

impl StreamMetrics {
    pub fn new(controller: impl Into<String>) -> Self {
        GLOBAL_METRICS.get_or_init(StreamMetricsInner::new);
        Self {
            controller: controller.into(),
        }
    }

    fn inner(&self) -> &StreamMetricsInner {
        GLOBAL_METRICS.get_or_init(StreamMetricsInner::new)
    }

    fn label(&self) -> [&str; 1] {
        [self.controller.as_str()]
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner()
            .prediction_latency_seconds
            .with_label_values(&self.label())
            .observe(duration_secs);
    }

    pub fn inc_predictions(&self) {
        self.inner().predictions.with_label_values(&self.label()).inc();
    }

    pub fn inc_anomalies(&self) {
        self.inner().anomalies.with_label_values(&self.label()).inc();
    }

    pub fn inc_prediction_errors(&self) {
        self.inner().prediction_errors.with_label_values(&self.label()).inc();
    }

    pub fn inc_write_errors(&self) {
        self.inner().write_errors.with_label_values(&self.label()).inc();
    }

    pub fn inc_validation_errors(&self) {
        self.inner().validation_errors.with_label_values(&self.label()).inc();
    }

    pub fn inc_cache_errors(&self) {
        self.inner().cache_errors.with_label_values(&self.label()).inc();
    }

    pub fn set_windowed_groups(&self, count: i64) {
        self.inner().windowed_groups.with_label_values(&self.label()).set(count);
    }

    pub fn predictions(&self) -> u64 {
        self.inner().predictions.with_label_values(&self.label()).get()
    }

    pub fn anomalies(&self) -> u64 {
        self.inner().anomalies.with_label_values(&self.label()).get()
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted logging for routed predictions,
/// training outcomes and controller lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    controller: String,
}

impl StructuredLogger {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
        }
    }

    pub fn log_started(&self, predictor: &str, mode: &str) {
        info!(
            event = "controller_started",
            controller = %self.controller,
            predictor = %predictor,
            mode = %mode,
            "Stream controller started"
        );
    }

    /// Log a result written to the output channel
    pub fn log_prediction(&self, predictor: &str, group: Option<&str>) {
        info!(
            event = "prediction_routed",
            controller = %self.controller,
            predictor = %predictor,
            group = ?group,
            "Prediction written to output stream"
        );
    }

    /// Log a result written to the anomaly channel
    pub fn log_anomaly(&self, predictor: &str, group: Option<&str>) {
        warn!(
            event = "anomaly_routed",
            controller = %self.controller,
            predictor = %predictor,
            group = ?group,
            "Anomalous prediction written to anomaly stream"
        );
    }

    pub fn log_training(&self, predictor: &str, records: usize, success: bool) {
        if success {
            info!(
                event = "training_finished",
                controller = %self.controller,
                predictor = %predictor,
                records = records,
                success = true,
                "Predictor trained on collected records"
            );
        } else {
            warn!(
                event = "training_finished",
                controller = %self.controller,
                predictor = %predictor,
                records = records,
                success = false,
                "Training failed, previous predictor kept"
            );
        }
    }

    pub fn log_stopped(&self, reason: &str) {
        info!(
            event = "controller_stopped",
            controller = %self.controller,
            reason = %reason,
            "Stream controller stopped"
        );
    }
}
