//! State shared by the realtime and windowed loops: the service, the router
//! and the per-controller metrics and event logger.

use super::router::{AnomalyRouter, Destination};
use crate::health::{components, HealthRegistry};
use crate::models::{PredictionResult, Record, When};
use crate::observability::{StreamMetrics, StructuredLogger};
use crate::service::PredictionService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Outcome of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records drained from the input channel
    pub records: usize,
    /// Records dropped by validation
    pub skipped: usize,
    /// Predict calls issued
    pub predictions: usize,
    /// Results written to the output channel
    pub outputs: usize,
    /// Results written to the anomaly channel
    pub anomalies: usize,
    /// Failed predict calls and channel writes
    pub errors: usize,
    /// Failed channel reads and writes
    pub channel_errors: usize,
    /// Window cache failures
    pub cache_errors: usize,
}

pub struct InferenceContext {
    pub(crate) controller: String,
    pub(crate) predictor: String,
    service: Arc<dyn PredictionService>,
    router: AnomalyRouter,
    pub(crate) metrics: StreamMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    channel_healthy: AtomicBool,
    cache_healthy: AtomicBool,
}

impl InferenceContext {
    pub fn new(
        controller: impl Into<String>,
        predictor: impl Into<String>,
        service: Arc<dyn PredictionService>,
        router: AnomalyRouter,
    ) -> Self {
        let controller = controller.into();
        Self {
            metrics: StreamMetrics::new(controller.clone()),
            logger: StructuredLogger::new(controller.clone()),
            controller,
            predictor: predictor.into(),
            service,
            router,
            health: HealthRegistry::new(),
            channel_healthy: AtomicBool::new(true),
            cache_healthy: AtomicBool::new(true),
        }
    }

    /// Report channel and cache health to `health` instead of a private registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Publish channel (and, for windowed loops, cache) health from one
    /// cycle's failures. Only transitions reach the registry.
    pub(crate) async fn record_health(&self, report: &CycleReport, uses_cache: bool) {
        self.publish(components::CHANNEL, &self.channel_healthy, report.channel_errors)
            .await;
        if uses_cache {
            self.publish(components::CACHE, &self.cache_healthy, report.cache_errors)
                .await;
        }
    }

    async fn publish(&self, component: &str, healthy: &AtomicBool, failures: usize) {
        let ok = failures == 0;
        if healthy.swap(ok, Ordering::Relaxed) == ok {
            return;
        }

        if ok {
            self.health.set_healthy(component).await;
        } else {
            warn!(controller = %self.controller, component, failures, "Component degraded");
            self.health
                .set_degraded(component, format!("{} failures in the last cycle", failures))
                .await;
        }
    }

    /// Call the prediction service; failures are logged, counted and
    /// reported as `None`.
    pub(crate) async fn predict(&self, when: When<'_>, report: &mut CycleReport) -> Option<PredictionResult> {
        report.predictions += 1;
        let start = Instant::now();

        let result = self.service.predict(&self.predictor, when).await;
        self.metrics
            .observe_prediction_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(result) => Some(result),
            Err(e) => {
                error!(
                    controller = %self.controller,
                    predictor = %self.predictor,
                    error = %e,
                    "Prediction failed"
                );
                self.metrics.inc_prediction_errors();
                report.errors += 1;
                None
            }
        }
    }

    /// Route one result; a failed write drops the result
    pub(crate) async fn emit(&self, record: &Record, group: Option<&str>, report: &mut CycleReport) {
        match self.router.route(record).await {
            Ok(Destination::Output) => {
                report.outputs += 1;
                self.metrics.inc_predictions();
                self.logger.log_prediction(&self.predictor, group);
            }
            Ok(Destination::Anomaly) => {
                report.anomalies += 1;
                self.metrics.inc_anomalies();
                self.logger.log_anomaly(&self.predictor, group);
            }
            Err(e) => {
                warn!(
                    controller = %self.controller,
                    group = ?group,
                    error = %e,
                    "Failed to write prediction result"
                );
                self.metrics.inc_write_errors();
                report.errors += 1;
                report.channel_errors += 1;
            }
        }
    }
}
