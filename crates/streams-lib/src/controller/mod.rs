//! Inference controllers
//!
//! A `StreamController` owns one worker task. On start the task checks the
//! predictor, fetches its timeseries settings and then runs either the
//! realtime or the windowed loop until it is stopped:
//!
//! ```text
//! Init -> Ready | Degraded -> Running -> Stopped
//! ```
//!
//! A missing predictor only degrades the controller; predictions are still
//! attempted every cycle.

mod context;
mod realtime;
mod router;
mod windowed;


pub use context::{CycleReport, InferenceContext};
pub use realtime::RealtimeInference;
pub use router::{AnomalyRouter, Destination};
pub use windowed::{WindowParams, WindowedInference};

use crate::cache::WindowCache;
use crate::channel::MessageChannel;
use crate::error::ControllerError;
use crate::health::{components, HealthRegistry};
use crate::models::DEFAULT_ANOMALY_SUFFIX;
use crate::observability::StructuredLogger;
use crate::service::PredictionService;
use crate::worker::WorkerHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Lifecycle state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Init,
    /// Predictor found
    Ready,
    /// Predictor not found; the loop runs anyway
    Degraded,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller name, used for logs, metrics and the service registration
    pub name: String,
    pub predictor: String,
    /// Sleep between drain cycles
    pub poll_interval: Duration,
    pub anomaly_suffix: String,
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>, predictor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predictor: predictor.into(),
            poll_interval: Duration::from_millis(500),
            anomaly_suffix: DEFAULT_ANOMALY_SUFFIX.to_string(),
        }
    }
}

/// A running controller: its worker plus a view of its state
pub struct ControllerHandle<T> {
    worker: WorkerHandle<T>,
    state: watch::Receiver<ControllerState>,
}

impl<T: Send + 'static> ControllerHandle<T> {
    pub(crate) fn new(worker: WorkerHandle<T>, state: watch::Receiver<ControllerState>) -> Self {
        Self { worker, state }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Wait until the controller reaches `target` or stops
    pub async fn wait_for(&mut self, target: ControllerState) -> ControllerState {
        match self
            .state
            .wait_for(|s| *s == target || *s == ControllerState::Stopped)
            .await
        {
            Ok(state) => *state,
            Err(_) => ControllerState::Stopped,
        }
    }

    /// Request cancellation and wait for the current cycle to finish
    pub async fn stop(self) -> Result<T, ControllerError> {
        Ok(self.worker.stop().await?)
    }

    /// Wait for the controller to finish on its own
    pub async fn join(self) -> Result<T, ControllerError> {
        Ok(self.worker.join().await?)
    }
}

enum Mode {
    Realtime(RealtimeInference),
    Windowed(WindowedInference),
}

impl Mode {
    fn name(&self) -> &'static str {
        match self {
            Mode::Realtime(_) => "realtime",
            Mode::Windowed(_) => "windowed",
        }
    }

    async fn run_cycle(&self) -> CycleReport {
        match self {
            Mode::Realtime(inference) => inference.run_cycle().await,
            Mode::Windowed(inference) => inference.run_cycle().await,
        }
    }
}

/// Builder for [`StreamController`]
pub struct StreamControllerBuilder {
    config: ControllerConfig,
    input: Option<Arc<dyn MessageChannel>>,
    output: Option<Arc<dyn MessageChannel>>,
    anomaly: Option<Arc<dyn MessageChannel>>,
    service: Option<Arc<dyn PredictionService>>,
    cache: Option<Arc<dyn WindowCache>>,
    health: Option<HealthRegistry>,
}

impl StreamControllerBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            input: None,
            output: None,
            anomaly: None,
            service: None,
            cache: None,
            health: None,
        }
    }

    pub fn input(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.input = Some(channel);
        self
    }

    pub fn output(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.output = Some(channel);
        self
    }

    pub fn anomaly(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.anomaly = Some(channel);
        self
    }

    pub fn service(mut self, service: Arc<dyn PredictionService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Window cache, required only for timeseries predictors
    pub fn cache(mut self, cache: Arc<dyn WindowCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<StreamController, ControllerError> {
        let input = self.input.ok_or(ControllerError::Missing("input channel"))?;
        let output = self.output.ok_or(ControllerError::Missing("output channel"))?;
        let service = self.service.ok_or(ControllerError::Missing("prediction service"))?;

        let router = AnomalyRouter::new(output, self.anomaly).with_suffix(&self.config.anomaly_suffix);
        let health = self.health.unwrap_or_default();
        let context = InferenceContext::new(
            &self.config.name,
            &self.config.predictor,
            service.clone(),
            router,
        )
        .with_health(health.clone());

        let (state, _) = watch::channel(ControllerState::Init);

        Ok(StreamController {
            logger: StructuredLogger::new(&self.config.name),
            config: self.config,
            input,
            service,
            cache: self.cache,
            context: Arc::new(context),
            health,
            state,
        })
    }
}

/// Inference controller bridging an input channel to the prediction service
pub struct StreamController {
    config: ControllerConfig,
    input: Arc<dyn MessageChannel>,
    service: Arc<dyn PredictionService>,
    cache: Option<Arc<dyn WindowCache>>,
    context: Arc<InferenceContext>,
    health: HealthRegistry,
    logger: StructuredLogger,
    state: watch::Sender<ControllerState>,
}

impl StreamController {
    pub fn builder(config: ControllerConfig) -> StreamControllerBuilder {
        StreamControllerBuilder::new(config)
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Spawn the controller's worker
    pub fn start(self) -> ControllerHandle<Result<(), ControllerError>> {
        let state = self.state.subscribe();
        let worker = WorkerHandle::spawn(self.config.name.clone(), move |shutdown| self.run(shutdown));
        ControllerHandle::new(worker, state)
    }

    /// Check the predictor, pick the loop and run it until shutdown is signalled
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ControllerError> {
        self.health.register(components::CHANNEL).await;
        self.health.register(components::PREDICTION_SERVICE).await;

        let mode = tokio::select! {
            mode = self.prepare() => mode,
            _ = shutdown.recv() => {
                self.finish("shutdown before start").await;
                return Ok(());
            }
        };

        let mode = match mode {
            Ok(mode) => mode,
            Err(e) => {
                self.health
                    .set_unhealthy(components::PREDICTION_SERVICE, e.to_string())
                    .await;
                self.finish("startup failed").await;
                return Err(e);
            }
        };

        self.health.set_ready(true).await;
        self.state.send_replace(ControllerState::Running);
        self.logger.log_started(&self.config.predictor, mode.name());

        loop {
            mode.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.finish("shutdown").await;
        Ok(())
    }

    async fn prepare(&self) -> Result<Mode, ControllerError> {
        let predictor = &self.config.predictor;

        if self.service.exists(predictor).await {
            self.health.set_healthy(components::PREDICTION_SERVICE).await;
            self.state.send_replace(ControllerState::Ready);
        } else {
            warn!(
                controller = %self.config.name,
                predictor = %predictor,
                "Predictor not found, continuing in degraded mode"
            );
            self.health
                .set_degraded(components::PREDICTION_SERVICE, format!("predictor {} not found", predictor))
                .await;
            self.state.send_replace(ControllerState::Degraded);
        }

        let settings = self.service.settings(predictor).await;
        if !settings.is_timeseries {
            return Ok(Mode::Realtime(RealtimeInference::new(
                self.context.clone(),
                self.input.clone(),
            )));
        }

        let params = WindowParams::try_from(&settings)?;
        let cache = self.cache.clone().ok_or(ControllerError::Missing("window cache"))?;
        self.health.register(components::CACHE).await;

        info!(
            controller = %self.config.name,
            predictor = %predictor,
            window = params.window,
            order_by = ?params.order_by,
            group_by = ?params.group_by,
            "Using windowed inference"
        );

        Ok(Mode::Windowed(WindowedInference::new(
            self.context.clone(),
            self.input.clone(),
            cache,
            params,
        )))
    }

    async fn finish(&self, reason: &str) {
        self.health.set_ready(false).await;
        self.state.send_replace(ControllerState::Stopped);
        self.logger.log_stopped(reason);
    }
}
