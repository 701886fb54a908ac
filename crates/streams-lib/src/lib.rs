//! Stream controllers bridging message channels to a prediction service
//!
//! This crate provides the core functionality for:
//! - Reading and writing records on message channels
//! - Realtime and windowed (grouped, ordered) inference with anomaly routing
//! - Window caches with local and redis backends
//! - Collect-and-train learning jobs
//! - Health checks and observability

pub mod cache;
pub mod channel;
pub mod controller;
pub mod error;
pub mod health;
pub mod learning;
pub mod models;
pub mod observability;
pub mod service;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CacheError, ChannelError, ControllerError, ServiceError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StreamMetrics, StructuredLogger};
