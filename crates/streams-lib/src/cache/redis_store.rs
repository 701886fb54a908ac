//! Redis-backed window cache
//!
//! Buffers are stored as JSON strings under `{prefix}_{key}`, and the group
//! keys of a prefix are tracked in the set `{prefix}:groups`. Listing reads
//! that set, so caches whose prefixes share a stem never see each other's
//! groups. Writes are staged in the transaction and applied, together with
//! the index update, in one MULTI/EXEC pipeline on commit.

use super::{CacheTransaction, WindowCache};
use crate::error::CacheError;
use crate::models::WindowBuffer;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ConnectionInfo};
use std::collections::BTreeMap;
use tracing::debug;

fn value_key(prefix: &str, key: &str) -> String {
    format!("{}_{}", prefix, key)
}

fn index_key(prefix: &str) -> String {
    format!("{}:groups", prefix)
}

/// Stored group keys plus the ones staged in this transaction, sorted
fn merge_keys(mut stored: Vec<String>, staged: &BTreeMap<String, WindowBuffer>) -> Vec<String> {
    for key in staged.keys() {
        if !stored.contains(key) {
            stored.push(key.clone());
        }
    }
    stored.sort();
    stored
}

pub struct RedisCache {
    prefix: String,
    connection: MultiplexedConnection,
}

impl RedisCache {
    /// Connect to redis; all keys are namespaced under `prefix`
    pub async fn connect(info: ConnectionInfo, prefix: &str) -> Result<Self, CacheError> {
        let client = Client::open(info)?;
        let connection = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            prefix: prefix.to_string(),
            connection,
        })
    }
}

#[async_trait]
impl WindowCache for RedisCache {
    async fn transaction<'a>(&'a self) -> Result<Box<dyn CacheTransaction + 'a>, CacheError> {
        Ok(Box::new(RedisTransaction {
            prefix: &self.prefix,
            connection: self.connection.clone(),
            staged: BTreeMap::new(),
        }))
    }
}

struct RedisTransaction<'a> {
    prefix: &'a str,
    connection: MultiplexedConnection,
    staged: BTreeMap<String, WindowBuffer>,
}

#[async_trait]
impl CacheTransaction for RedisTransaction<'_> {
    async fn contains(&mut self, key: &str) -> Result<bool, CacheError> {
        if self.staged.contains_key(key) {
            return Ok(true);
        }
        let exists: bool = self.connection.exists(value_key(self.prefix, key)).await?;
        Ok(exists)
    }

    async fn get(&mut self, key: &str) -> Result<WindowBuffer, CacheError> {
        if let Some(buffer) = self.staged.get(key) {
            return Ok(buffer.clone());
        }

        let stored: Option<String> = self.connection.get(value_key(self.prefix, key)).await?;
        match stored {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(CacheError::NotFound(key.to_string())),
        }
    }

    async fn set(&mut self, key: &str, value: WindowBuffer) -> Result<(), CacheError> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&mut self) -> Result<Vec<String>, CacheError> {
        let stored: Vec<String> = self.connection.smembers(index_key(self.prefix)).await?;
        Ok(merge_keys(stored, &self.staged))
    }

    async fn commit(&mut self) -> Result<(), CacheError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let index = index_key(self.prefix);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, buffer) in &self.staged {
            pipe.set(value_key(self.prefix, key), serde_json::to_string(buffer)?)
                .ignore();
            pipe.sadd(&index, key).ignore();
        }

        let _: () = pipe.query_async(&mut self.connection).await?;
        debug!(prefix = %self.prefix, keys = self.staged.len(), "Committed window cache writes");
        self.staged.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use serde_json::json;

    fn buffer(orders: &[i64]) -> WindowBuffer {
        orders
            .iter()
            .map(|o| json!({ "order": o }).as_object().cloned().unwrap())
            .collect::<Vec<Record>>()
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(value_key("p_cache", r#"["a"]"#), r#"p_cache_["a"]"#);
        assert_eq!(value_key("p_cache", ""), "p_cache_");
        assert_eq!(index_key("p_cache"), "p_cache:groups");
    }

    #[test]
    fn test_group_keys_never_collide_with_index() {
        // group keys are "" or JSON array text, so a value key never ends in ":groups"
        for key in ["", r#"["a"]"#, r#"[1,"x"]"#] {
            assert!(!value_key("p_cache", key).ends_with(":groups"));
        }
    }

    #[test]
    fn test_merge_keys_adds_staged_once() {
        let mut staged = BTreeMap::new();
        staged.insert(r#"["b"]"#.to_string(), buffer(&[1]));
        staged.insert(r#"["a"]"#.to_string(), buffer(&[2]));

        let keys = merge_keys(vec![r#"["c"]"#.into(), r#"["a"]"#.into()], &staged);
        assert_eq!(keys, vec![r#"["a"]"#, r#"["b"]"#, r#"["c"]"#]);
    }

    // Requires a running redis: docker run -d -p 6379:6379 redis:latest
    async fn connect(prefix: &str) -> RedisCache {
        let info = redis::IntoConnectionInfo::into_connection_info("redis://127.0.0.1:6379/").unwrap();
        let cache = RedisCache::connect(info, prefix).await.unwrap();
        let mut conn = cache.connection.clone();
        let stale: Vec<String> = conn.keys(format!("{}*", prefix)).await.unwrap();
        for key in stale {
            let _: () = conn.del(key).await.unwrap();
        }
        cache
    }

    #[tokio::test]
    #[ignore]
    async fn test_staged_writes_shadow_reads_until_commit() {
        let cache = connect("streams_lib_test_shadow").await;

        let mut tx = cache.transaction().await.unwrap();
        assert!(matches!(tx.get("").await, Err(CacheError::NotFound(_))));
        tx.set("", buffer(&[1, 2])).await.unwrap();
        assert_eq!(tx.get("").await.unwrap(), buffer(&[1, 2]));
        assert_eq!(tx.keys().await.unwrap(), vec![String::new()]);
        drop(tx);

        let mut tx = cache.transaction().await.unwrap();
        assert!(!tx.contains("").await.unwrap());
        tx.set("", buffer(&[3])).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = cache.transaction().await.unwrap();
        assert_eq!(tx.get("").await.unwrap(), buffer(&[3]));
    }

    #[tokio::test]
    #[ignore]
    async fn test_prefixes_sharing_a_stem_are_isolated() {
        let short = connect("streams_lib_test_p_cache").await;
        let long = connect("streams_lib_test_p_cache_x_cache").await;

        let mut tx = long.transaction().await.unwrap();
        tx.set(r#"["g"]"#, buffer(&[1])).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = short.transaction().await.unwrap();
        assert!(tx.keys().await.unwrap().is_empty());

        let mut tx = long.transaction().await.unwrap();
        assert_eq!(tx.keys().await.unwrap(), vec![r#"["g"]"#.to_string()]);
    }
}
