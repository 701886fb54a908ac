//! Message channels the controllers read from and write to
//!
//! A channel is an ordered source/sink of records. `read` returns whatever is
//! currently available and consumes it; `write` appends one record. Delivery is
//! at-least-once, downstream consumers must tolerate duplicates.

mod file;
mod memory;
mod redis_stream;

pub use file::FileChannel;
pub use memory::MemoryChannel;
pub use redis_stream::{ConnectionInfo, ConsumerOptions, ProducerOptions, RedisStreamChannel};

use crate::error::ChannelError;
use crate::models::Record;
use async_trait::async_trait;
use serde_json::Value;

/// Trait for channel backends
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Drain the records currently available
    async fn read(&self) -> Result<Vec<Record>, ChannelError>;

    /// Append a record
    async fn write(&self, record: &Record) -> Result<(), ChannelError>;

    /// Short description used in logs
    fn describe(&self) -> String;
}

/// Decode one serialized message into a record
pub(crate) fn parse_record(data: &[u8]) -> Result<Record, ChannelError> {
    match serde_json::from_slice::<Value>(data)? {
        Value::Object(record) => Ok(record),
        other => Err(ChannelError::NotARecord(other.to_string())),
    }
}
