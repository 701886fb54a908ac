//! In-process FIFO channel

use super::MessageChannel;
use crate::error::ChannelError;
use crate::models::Record;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryChannel {
    name: String,
    queue: Mutex<VecDeque<Record>>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of records waiting to be read
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn read(&self) -> Result<Vec<Record>, ChannelError> {
        Ok(self.queue.lock().await.drain(..).collect())
    }

    async fn write(&self, record: &Record) -> Result<(), ChannelError> {
        self.queue.lock().await.push_back(record.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MemoryChannel: name={}", self.name)
    }
}
