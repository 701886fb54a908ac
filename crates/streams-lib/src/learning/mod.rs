//! Learning controller: collect a timed batch of records, train on it, swap
//! the result in
//!
//! Steps of one job:
//! 0. check the predictor; its existence decides the training target
//! 1. read the input channel every `collect_interval` until `threshold` has
//!    elapsed
//! 2. upload the records as dataset `{predictor}_training_ds_{timestamp}`
//! 3. train `predictor` directly when it does not exist yet; otherwise train
//!    `TMP_{predictor}_{timestamp}`, delete the live model and rename the
//!    temporary one into place
//! 4. write a status record to the output channel
//! 5. delete the controller's registration with the prediction service
//!
//! Step 5 runs exactly once whatever happened before it.

#[cfg(test)]
mod tests;

use crate::channel::MessageChannel;
use crate::controller::{ControllerHandle, ControllerState};
use crate::health::{components, HealthRegistry};
use crate::models::{JobStatus, Record, StatusRecord};
use crate::observability::StructuredLogger;
use crate::service::PredictionService;
use crate::worker::WorkerHandle;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Controller name; also the registration removed on completion
    pub name: String,
    pub predictor: String,
    /// Training parameters passed through to the prediction service
    pub params: Record,
    /// How long to collect records before training
    pub threshold: Duration,
    pub collect_interval: Duration,
}

impl LearningConfig {
    pub fn new(name: impl Into<String>, predictor: impl Into<String>, threshold: Duration) -> Self {
        Self {
            name: name.into(),
            predictor: predictor.into(),
            params: Record::new(),
            threshold,
            collect_interval: Duration::from_millis(200),
        }
    }

    pub fn with_params(mut self, params: Record) -> Self {
        self.params = params;
        self
    }
}

/// One collect-and-train job and its outcome
#[derive(Debug, Clone)]
pub struct LearningJob {
    pub predictor: String,
    pub threshold: Duration,
    pub records: Vec<Record>,
    pub status: Option<JobStatus>,
    pub details: String,
    /// Name the model was trained under
    pub trained_as: Option<String>,
}

impl LearningJob {
    fn new(config: &LearningConfig) -> Self {
        Self {
            predictor: config.predictor.clone(),
            threshold: config.threshold,
            records: Vec::new(),
            status: None,
            details: String::new(),
            trained_as: None,
        }
    }
}

/// Dataset and model names derived from the job start time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingNames {
    pub dataset: String,
    pub temporary: String,
}

impl TrainingNames {
    pub fn new(predictor: &str, at: DateTime<Utc>) -> Self {
        let timestamp = at.format(TIMESTAMP_FORMAT);
        Self {
            dataset: format!("{}_training_ds_{}", predictor, timestamp),
            temporary: format!("TMP_{}_{}", predictor, timestamp),
        }
    }
}

/// Add the dataset name and the blocking-training flag to user parameters
pub fn training_params(params: &Record, dataset: &str) -> anyhow::Result<Record> {
    let mut params = params.clone();
    params.insert("data_source_name".into(), Value::String(dataset.to_string()));

    let kwargs = params
        .entry("kwargs")
        .or_insert_with(|| Value::Object(Record::new()));
    match kwargs {
        Value::Object(kwargs) => {
            kwargs.insert("join_learn_process".into(), Value::Bool(true));
        }
        other => bail!("training parameter 'kwargs' must be an object, got {}", other),
    }
    Ok(params)
}

pub struct LearningController {
    config: LearningConfig,
    input: Arc<dyn MessageChannel>,
    output: Arc<dyn MessageChannel>,
    service: Arc<dyn PredictionService>,
    health: HealthRegistry,
    logger: StructuredLogger,
    state: watch::Sender<ControllerState>,
}

impl LearningController {
    pub fn new(
        config: LearningConfig,
        input: Arc<dyn MessageChannel>,
        output: Arc<dyn MessageChannel>,
        service: Arc<dyn PredictionService>,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Init);
        Self {
            logger: StructuredLogger::new(&config.name),
            config,
            input,
            output,
            service,
            health: HealthRegistry::new(),
            state,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn start(self) -> ControllerHandle<LearningJob> {
        let state = self.state.subscribe();
        let worker = WorkerHandle::spawn(self.config.name.clone(), move |shutdown| self.run(shutdown));
        ControllerHandle::new(worker, state)
    }

    /// Run a single job to completion; cancellation during collection skips
    /// training but still removes the registration.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> LearningJob {
        let mut job = LearningJob::new(&self.config);

        self.health.register(components::LEARNING).await;
        self.health.register(components::PREDICTION_SERVICE).await;

        let replace = self.check_predictor().await;

        self.health.set_ready(true).await;
        self.state.send_replace(ControllerState::Running);
        self.logger.log_started(&self.config.predictor, "learning");

        if self.collect(&mut job, &mut shutdown).await {
            self.train_and_report(&mut job, replace).await;
        } else {
            info!(controller = %self.config.name, "Learning cancelled during collection");
        }

        self.cleanup().await;

        self.health.set_ready(false).await;
        self.state.send_replace(ControllerState::Stopped);
        self.logger.log_stopped("learning finished");
        job
    }

    /// Check whether the predictor already exists and publish `Ready` or
    /// `Degraded` accordingly
    async fn check_predictor(&self) -> bool {
        let predictor = &self.config.predictor;

        if self.service.exists(predictor).await {
            self.health.set_healthy(components::PREDICTION_SERVICE).await;
            self.state.send_replace(ControllerState::Ready);
            true
        } else {
            info!(
                controller = %self.config.name,
                predictor = %predictor,
                "Predictor not found, training it from scratch"
            );
            self.health
                .set_degraded(components::PREDICTION_SERVICE, format!("predictor {} not found", predictor))
                .await;
            self.state.send_replace(ControllerState::Degraded);
            false
        }
    }

    /// Accumulate records until the threshold elapses. Returns false when
    /// cancelled first.
    async fn collect(&self, job: &mut LearningJob, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let deadline = Instant::now() + self.config.threshold;

        while Instant::now() < deadline {
            match self.input.read().await {
                Ok(records) => job.records.extend(records),
                Err(e) => warn!(controller = %self.config.name, error = %e, "Failed to read input stream"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.collect_interval) => {}
                _ = shutdown.recv() => return false,
            }
        }

        debug!(
            controller = %self.config.name,
            records = job.records.len(),
            "Collection finished"
        );
        true
    }

    async fn train_and_report(&self, job: &mut LearningJob, replace: bool) {
        let names = TrainingNames::new(&self.config.predictor, Utc::now());

        match self.train(job, &names, replace).await {
            Ok(()) => {
                job.status = Some(JobStatus::Success);
                self.health.set_healthy(components::LEARNING).await;
            }
            Err(e) => {
                error!(
                    controller = %self.config.name,
                    predictor = %self.config.predictor,
                    error = %format!("{:#}", e),
                    "Training failed"
                );
                job.status = Some(JobStatus::Error);
                job.details = format!("{:#}", e);
                self.health
                    .set_degraded(components::LEARNING, "last training failed")
                    .await;
            }
        }

        let success = job.status == Some(JobStatus::Success);
        self.logger
            .log_training(&self.config.predictor, job.records.len(), success);

        let status = StatusRecord::training(
            &self.config.predictor,
            job.status.unwrap_or(JobStatus::Error),
            job.details.clone(),
        );
        if let Err(e) = self.output.write(&status.into_record()).await {
            error!(controller = %self.config.name, error = %e, "Failed to write training status");
        }
    }

    /// Upload and train. With `replace` the model is trained under the
    /// temporary name and swapped in, so a live model keeps serving meanwhile.
    async fn train(&self, job: &mut LearningJob, names: &TrainingNames, replace: bool) -> anyhow::Result<()> {
        let predictor = &self.config.predictor;

        self.service
            .upload_dataset(&names.dataset, &job.records)
            .await
            .with_context(|| format!("failed to upload dataset {}", names.dataset))?;

        let target = if replace {
            names.temporary.clone()
        } else {
            predictor.clone()
        };

        let params = training_params(&self.config.params, &names.dataset)?;
        self.service
            .train(&target, &params)
            .await
            .with_context(|| format!("failed to train {}", target))?;
        job.trained_as = Some(target.clone());

        if replace {
            self.service
                .delete_model(predictor)
                .await
                .with_context(|| format!("failed to delete previous model {}", predictor))?;
            self.service
                .rename_model(&target, predictor)
                .await
                .with_context(|| format!("failed to rename {} to {}", target, predictor))?;
        }

        info!(
            controller = %self.config.name,
            predictor = %predictor,
            dataset = %names.dataset,
            records = job.records.len(),
            "Predictor trained"
        );
        Ok(())
    }

    async fn cleanup(&self) {
        if let Err(e) = self.service.delete_registration(&self.config.name).await {
            warn!(controller = %self.config.name, error = %e, "Failed to remove controller registration");
        }
    }
}
