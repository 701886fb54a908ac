//! Window cache: per-group record buffers behind a transactional key-value API
//!
//! Stored sequences cannot be mutated in place, so every update is a
//! read-modify-write inside a transaction:
//!
//! ```ignore
//! let mut tx = cache.transaction().await?;
//! let mut buffer = if tx.contains(key).await? { tx.get(key).await? } else { Vec::new() };
//! buffer.push(record);
//! tx.set(key, buffer).await?;
//! tx.commit().await?;
//! ```
//!
//! A transaction only guarantees release of local resources. The redis
//! backend gives no cross-process mutual exclusion, so each key must have a
//! single writing controller.

mod local;
mod redis_store;

pub use local::LocalCache;
pub use redis_store::RedisCache;

use crate::error::CacheError;
use crate::models::WindowBuffer;
use async_trait::async_trait;
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Trait for window cache backends
#[async_trait]
pub trait WindowCache: Send + Sync {
    /// Begin a scoped transaction. Dropping it without `commit` discards
    /// staged writes and releases the handle.
    async fn transaction<'a>(&'a self) -> Result<Box<dyn CacheTransaction + 'a>, CacheError>;
}

/// Operations available inside a cache transaction
#[async_trait]
pub trait CacheTransaction: Send {
    async fn contains(&mut self, key: &str) -> Result<bool, CacheError>;

    /// Fetch the buffer stored under `key`, `CacheError::NotFound` if absent
    async fn get(&mut self, key: &str) -> Result<WindowBuffer, CacheError>;

    async fn set(&mut self, key: &str, value: WindowBuffer) -> Result<(), CacheError>;

    async fn keys(&mut self) -> Result<Vec<String>, CacheError>;

    /// Make staged writes visible and durable
    async fn commit(&mut self) -> Result<(), CacheError>;
}

/// Which store backs the window cache
#[derive(Debug, Clone)]
pub enum CacheBackend {
    /// Single-process store, persisted under `dir` (memory only when `None`)
    Local { dir: Option<PathBuf> },
    /// Shared networked store
    Redis { connection: ConnectionInfo },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Local {
                dir: Some(default_cache_dir()),
            },
        }
    }
}

/// `$HOME/cache`
pub fn default_cache_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/home/ubuntu".to_string());
    PathBuf::from(home).join("cache")
}

impl CacheConfig {
    /// Select the redis backend when a networked-cache connection string is
    /// present, the local store under `dir` otherwise.
    ///
    /// The connection string is either a redis URL or a JSON object with a
    /// `url`, or with `host`/`port`/`db`/`password`.
    pub fn from_connection(connection: Option<&str>, dir: Option<PathBuf>) -> Result<Self, CacheError> {
        let backend = match connection.map(str::trim).filter(|c| !c.is_empty()) {
            Some(raw) if raw.starts_with('{') => CacheBackend::Redis {
                connection: redis_connection_from_json(&serde_json::from_str(raw)?)?,
            },
            Some(url) => CacheBackend::Redis {
                connection: url.into_connection_info()?,
            },
            None => CacheBackend::Local {
                dir: Some(dir.unwrap_or_else(default_cache_dir)),
            },
        };
        Ok(Self { backend })
    }
}

fn redis_connection_from_json(params: &Value) -> Result<ConnectionInfo, CacheError> {
    if let Some(url) = params.get("url").and_then(Value::as_str) {
        return Ok(url.into_connection_info()?);
    }

    let host = params.get("host").and_then(Value::as_str).unwrap_or("127.0.0.1");
    let port = params
        .get("port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(6379);

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_string(), port),
        redis: RedisConnectionInfo {
            db: params.get("db").and_then(Value::as_i64).unwrap_or(0),
            password: params
                .get("password")
                .and_then(Value::as_str)
                .map(str::to_string),
            ..Default::default()
        },
    })
}

/// Open the configured cache backend under `name`
pub async fn open_cache(config: &CacheConfig, name: &str) -> Result<Arc<dyn WindowCache>, CacheError> {
    match &config.backend {
        CacheBackend::Local { dir: Some(dir) } => {
            info!(name = %name, dir = %dir.display(), "Opening local window cache");
            Ok(Arc::new(LocalCache::open(dir, name).await?))
        }
        CacheBackend::Local { dir: None } => Ok(Arc::new(LocalCache::in_memory(name))),
        CacheBackend::Redis { connection } => {
            info!(name = %name, addr = %connection.addr, "Opening redis window cache");
            Ok(Arc::new(RedisCache::connect(connection.clone(), name).await?))
        }
    }
}
