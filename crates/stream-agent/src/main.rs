//! Stream Agent - runs one stream controller
//!
//! Reads records from the configured input stream, predicts through the
//! prediction service and writes results to the output (and anomaly) stream,
//! or collects a training batch and retrains the predictor.

use anyhow::Result;
use std::sync::Arc;
use streams_lib::{
    cache::open_cache,
    channel::{FileChannel, MessageChannel, RedisStreamChannel},
    controller::{ControllerConfig, ControllerState, StreamController},
    health::{components, HealthRegistry},
    learning::{LearningConfig, LearningController},
    service::{HttpPredictionService, PredictionService},
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{AgentConfig, ChannelType, Mode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AgentConfig::load()?;
    info!(
        controller = %config.name,
        predictor = %config.predictor,
        mode = ?config.mode,
        channel_type = ?config.channel_type,
        "Starting stream-agent"
    );

    let health_registry = HealthRegistry::new();
    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let service: Arc<dyn PredictionService> =
        Arc::new(HttpPredictionService::new(config.service_config())?);

    let input = open_channel(&config, &config.input_stream).await?;
    let output = open_channel(&config, &config.output_stream).await?;
    health_registry.register(components::CHANNEL).await;

    match config.mode {
        Mode::Inference => run_inference(&config, input, output, service, health_registry).await?,
        Mode::Learning => {
            let learning = LearningConfig::new(&config.name, &config.predictor, config.learning_threshold())
                .with_params(config.learning_params()?);
            let mut handle = LearningController::new(learning, input, output, service)
                .with_health(health_registry)
                .start();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received, cancelling learning job"),
                _ = handle.wait_for(ControllerState::Stopped) => {}
            }

            let job = handle.stop().await?;
            info!(status = ?job.status, records = job.records.len(), "Learning job finished");
        }
    }

    api_handle.abort();
    info!("Shutting down");
    Ok(())
}

async fn run_inference(
    config: &AgentConfig,
    input: Arc<dyn MessageChannel>,
    output: Arc<dyn MessageChannel>,
    service: Arc<dyn PredictionService>,
    health_registry: HealthRegistry,
) -> Result<()> {
    let mut controller_config = ControllerConfig::new(&config.name, &config.predictor);
    controller_config.poll_interval = config.poll_interval();

    let cache_name = format!("{}_cache", config.predictor);
    let cache = match open_cache(&config.cache_config()?, &cache_name).await {
        Ok(cache) => Some(cache),
        Err(e) => {
            // only timeseries predictors need the cache
            error!(error = %e, "Window cache unavailable");
            health_registry
                .set_degraded(components::CACHE, e.to_string())
                .await;
            None
        }
    };

    let mut builder = StreamController::builder(controller_config)
        .input(input)
        .output(output)
        .service(service)
        .health(health_registry);
    if let Some(anomaly_stream) = &config.anomaly_stream {
        builder = builder.anomaly(open_channel(config, anomaly_stream).await?);
    }
    if let Some(cache) = cache {
        builder = builder.cache(cache);
    }

    let mut handle = builder.build()?.start();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = handle.wait_for(ControllerState::Stopped) => error!("Controller stopped on its own"),
    }

    handle.stop().await??;
    Ok(())
}

async fn open_channel(config: &AgentConfig, stream: &str) -> Result<Arc<dyn MessageChannel>> {
    let channel: Arc<dyn MessageChannel> = match config.channel_type {
        ChannelType::File => Arc::new(FileChannel::new(stream)),
        ChannelType::Redis => Arc::new(RedisStreamChannel::connect(stream, &config.connection_info()?).await?),
    };
    info!(channel = %channel.describe(), "Opened channel");
    Ok(channel)
}
