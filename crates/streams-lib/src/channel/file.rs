//! Newline-delimited JSON file channel
//!
//! Every `write` appends one line; `read` returns all lines and truncates the
//! file. Intended for local runs and tests.

use super::{parse_record, MessageChannel};
use crate::error::ChannelError;
use crate::models::Record;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

pub struct FileChannel {
    path: PathBuf,
    // serializes read-then-truncate against appends from this process
    lock: Mutex<()>,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

}

#[async_trait]
impl MessageChannel for FileChannel {
    async fn read(&self) -> Result<Vec<Record>, ChannelError> {
        let _guard = self.lock.lock().await;

        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in content
            .split(|b| *b == b'\n')
            .filter(|l| !l.iter().all(u8::is_ascii_whitespace))
        {
            match parse_record(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %self.path.display(), error = %e, "Skipping malformed line"),
            }
        }

        tokio::fs::write(&self.path, b"").await?;
        Ok(records)
    }

    async fn write(&self, record: &Record) -> Result<(), ChannelError> {
        let _guard = self.lock.lock().await;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("FileChannel: file={}", self.path.display())
    }
}
