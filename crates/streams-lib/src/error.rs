//! Error types shared by channels, caches, the service client and controllers

use thiserror::Error;

/// Failure reading from or writing to a message channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Message is not a JSON object: {0}")]
    NotARecord(String),

    #[error("Invalid channel configuration: {0}")]
    Config(String),
}

/// Failure of a window cache operation
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Failure talking to the prediction service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Prediction service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// A record or settings block that cannot be used for windowed inference
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Record doesn't contain order_by field '{0}'")]
    MissingOrderBy(String),

    #[error("Record doesn't contain group_by field '{0}'")]
    MissingGroupBy(String),

    #[error("Invalid timeseries settings: {0}")]
    InvalidSettings(String),
}

/// Failure that stops a controller
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Missing component: {0}")]
    Missing(&'static str),

    #[error("Controller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
