//! Local single-process window cache
//!
//! All buffers live in one mutex-guarded map. A transaction holds the mutex
//! for its whole lifetime; `commit` persists the merged map to
//! `{dir}/{name}.json` (temp file + rename) and only then applies it, so a
//! failed commit leaves the cache unchanged.

use super::{CacheTransaction, WindowCache};
use crate::error::CacheError;
use crate::models::WindowBuffer;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

type Entries = BTreeMap<String, WindowBuffer>;

pub struct LocalCache {
    name: String,
    path: Option<PathBuf>,
    entries: Mutex<Entries>,
}

impl LocalCache {
    /// Cache that is never written to disk
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            entries: Mutex::new(Entries::new()),
        }
    }

    /// Open (or create) the cache file `{dir}/{name}.json`
    pub async fn open(dir: &Path, name: &str) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.json", name));

        let entries = match tokio::fs::read(&path).await {
            Ok(data) => {
                let entries: Entries = serde_json::from_slice(&data)?;
                info!(path = %path.display(), groups = entries.len(), "Loaded window cache from disk");
                entries
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            name: name.to_string(),
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    async fn persist(path: &Path, entries: &Entries) -> Result<(), CacheError> {
        let json = serde_json::to_vec(entries)?;

        let temp_path = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;

        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl WindowCache for LocalCache {
    async fn transaction<'a>(&'a self) -> Result<Box<dyn CacheTransaction + 'a>, CacheError> {
        let entries = self.entries.lock().await;
        Ok(Box::new(LocalTransaction {
            name: &self.name,
            path: self.path.as_deref(),
            entries,
            staged: Entries::new(),
        }))
    }
}

struct LocalTransaction<'a> {
    name: &'a str,
    path: Option<&'a Path>,
    entries: MutexGuard<'a, Entries>,
    staged: Entries,
}

#[async_trait]
impl CacheTransaction for LocalTransaction<'_> {
    async fn contains(&mut self, key: &str) -> Result<bool, CacheError> {
        Ok(self.staged.contains_key(key) || self.entries.contains_key(key))
    }

    async fn get(&mut self, key: &str) -> Result<WindowBuffer, CacheError> {
        self.staged
            .get(key)
            .or_else(|| self.entries.get(key))
            .cloned()
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set(&mut self, key: &str, value: WindowBuffer) -> Result<(), CacheError> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&mut self) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.extend(
            self.staged
                .keys()
                .filter(|k| !self.entries.contains_key(*k))
                .cloned(),
        );
        Ok(keys)
    }

    async fn commit(&mut self) -> Result<(), CacheError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let Some(path) = self.path else {
            self.entries.append(&mut self.staged);
            return Ok(());
        };

        // the live map only changes once the merged copy is on disk
        let mut merged = self.entries.clone();
        merged.extend(std::mem::take(&mut self.staged));
        LocalCache::persist(path, &merged).await?;
        debug!(cache = %self.name, groups = merged.len(), "Window cache flushed to disk");

        *self.entries = merged;
        Ok(())
    }
}

impl Drop for LocalTransaction<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(cache = %self.name, discarded = self.staged.len(), "Dropping uncommitted window cache writes");
        }
    }
}
