//! Agent configuration, read from `STREAM_*` environment variables

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use streams_lib::cache::CacheConfig;
use streams_lib::channel::ConnectionInfo;
use streams_lib::service::{ServiceConfig, DEFAULT_SERVICE_URL};
use streams_lib::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Inference,
    Learning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[default]
    File,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Controller name
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub predictor: String,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub channel_type: ChannelType,

    /// Redis channel connection info as JSON
    pub connection_info: Option<String>,

    /// Input file path or redis stream key
    #[serde(default)]
    pub input_stream: String,

    #[serde(default)]
    pub output_stream: String,

    pub anomaly_stream: Option<String>,

    pub service_url: Option<String>,

    pub company_id: Option<String>,

    /// Networked window cache, JSON or plain redis URL
    pub redis_cache: Option<String>,

    pub cache_dir: Option<PathBuf>,

    /// Training parameters as a JSON object
    pub learning_params: Option<String>,

    #[serde(default = "default_learning_threshold")]
    pub learning_threshold_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_name() -> String {
    "stream".to_string()
}

fn default_learning_threshold() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    500
}

fn default_api_port() -> u16 {
    8080
}

/// First set, non-empty variable among `names`
fn env_fallback(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("STREAM"))
            .build()?;

        let mut agent: AgentConfig = config
            .try_deserialize()
            .context("invalid STREAM_* configuration")?;
        agent.apply_fallbacks();
        agent.validate()?;
        Ok(agent)
    }

    fn apply_fallbacks(&mut self) {
        if self.service_url.is_none() {
            self.service_url = env_fallback(&["MINDSDB_URL"]);
        }
        if self.company_id.is_none() {
            self.company_id = env_fallback(&["MINDSDB_COMPANY_ID", "COMPANY_ID"]);
        }
        if self.redis_cache.is_none() {
            self.redis_cache = env_fallback(&["REDIS_CACHE"]);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.predictor.is_empty() {
            bail!("STREAM_PREDICTOR must be set");
        }
        if self.input_stream.is_empty() || self.output_stream.is_empty() {
            bail!("STREAM_INPUT_STREAM and STREAM_OUTPUT_STREAM must be set");
        }
        if self.channel_type == ChannelType::Redis && self.connection_info.is_none() {
            bail!("STREAM_CONNECTION_INFO is required for redis channels");
        }
        Ok(())
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            url: self
                .service_url
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            company_id: self.company_id.clone(),
            ..Default::default()
        }
    }

    pub fn cache_config(&self) -> Result<CacheConfig> {
        CacheConfig::from_connection(self.redis_cache.as_deref(), self.cache_dir.clone())
            .context("invalid redis cache connection")
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let raw = self.connection_info.as_deref().unwrap_or("{}");
        ConnectionInfo::from_json(raw).context("invalid STREAM_CONNECTION_INFO")
    }

    pub fn learning_params(&self) -> Result<Record> {
        match self.learning_params.as_deref() {
            None => Ok(Record::new()),
            Some(raw) => serde_json::from_str(raw).context("STREAM_LEARNING_PARAMS must be a JSON object"),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn learning_threshold(&self) -> Duration {
        Duration::from_secs(self.learning_threshold_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AgentConfig {
        serde_json::from_value(serde_json::json!({
            "predictor": "p",
            "input_stream": "in.jsonl",
            "output_stream": "out.jsonl"
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.name, "stream");
        assert_eq!(config.mode, Mode::Inference);
        assert_eq!(config.channel_type, ChannelType::File);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.api_port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_channel_needs_connection_info() {
        let mut config = minimal();
        config.channel_type = ChannelType::Redis;
        assert!(config.validate().is_err());

        config.connection_info = Some(r#"{"url": "redis://localhost/"}"#.into());
        assert!(config.validate().is_ok());
        assert_eq!(config.connection_info().unwrap().url, "redis://localhost/");
    }

    #[test]
    fn test_learning_params() {
        let mut config = minimal();
        assert!(config.learning_params().unwrap().is_empty());

        config.learning_params = Some(r#"{"to_predict": "y"}"#.into());
        assert_eq!(config.learning_params().unwrap()["to_predict"], "y");

        config.learning_params = Some("[1]".into());
        assert!(config.learning_params().is_err());
    }

    #[test]
    fn test_service_config_default_url() {
        let config = minimal();
        assert_eq!(config.service_config().url, DEFAULT_SERVICE_URL);
    }
}
