//! Redis stream channel
//!
//! Producers XADD each record as JSON under the empty field name. Consumers
//! XREAD from the start of the stream and XDEL what they read, so a read both
//! returns and removes the consumed entries. Entries written by other
//! producers as flat field maps are decoded field by field into strings.

use super::{parse_record, MessageChannel};
use crate::error::ChannelError;
use crate::models::Record;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Field holding the JSON payload of an entry
const PAYLOAD_FIELD: &str = "";

/// Default number of entries returned per read
const DEFAULT_MAX_BATCH: usize = 1000;

/// Channel connection parameters, e.g.
/// `{"url": "redis://127.0.0.1/", "advanced": {"consumer": {"max_batch": 100}}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionInfo {
    pub url: String,
    #[serde(default)]
    pub advanced: AdvancedOptions,
}

/// Separate tuning overrides for the producing and consuming side
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvancedOptions {
    #[serde(default)]
    pub producer: ProducerOptions,
    #[serde(default)]
    pub consumer: ConsumerOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProducerOptions {
    /// Approximate cap on stream length, applied on every XADD
    pub max_len: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerOptions {
    /// Maximum entries returned by one read
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

fn default_max_batch() -> usize {
    DEFAULT_MAX_BATCH
}

impl ConnectionInfo {
    /// Parse connection info from its JSON form
    pub fn from_json(raw: &str) -> Result<Self, ChannelError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Decode the fields of one stream entry. The JSON payload under the empty
/// field wins; otherwise every field becomes a string value.
fn decode_fields(mut fields: BTreeMap<String, Vec<u8>>) -> Result<Record, ChannelError> {
    if let Some(payload) = fields.remove(PAYLOAD_FIELD) {
        return parse_record(&payload);
    }

    Ok(fields
        .into_iter()
        .map(|(field, value)| {
            let text = String::from_utf8_lossy(&value).into_owned();
            (field, Value::String(text))
        })
        .collect())
}

fn decode_entry(entry: &StreamId) -> Result<Record, ChannelError> {
    let mut fields = BTreeMap::new();
    for (field, value) in &entry.map {
        let bytes: Vec<u8> = redis::from_redis_value(value)?;
        fields.insert(field.clone(), bytes);
    }
    decode_fields(fields)
}

pub struct RedisStreamChannel {
    stream: String,
    url: String,
    connection: MultiplexedConnection,
    producer: ProducerOptions,
    consumer: ConsumerOptions,
}

impl RedisStreamChannel {
    /// Connect to redis and bind the channel to stream `stream`
    pub async fn connect(stream: impl Into<String>, info: &ConnectionInfo) -> Result<Self, ChannelError> {
        if info.advanced.consumer.max_batch == 0 {
            return Err(ChannelError::Config("consumer.max_batch must be positive".into()));
        }

        let client = Client::open(info.url.as_str())?;
        let connection = client.get_multiplexed_async_connection().await?;
        let stream = stream.into();

        debug!(stream = %stream, "Connected redis stream channel");

        Ok(Self {
            stream,
            url: info.url.clone(),
            connection,
            producer: info.advanced.producer.clone(),
            consumer: info.advanced.consumer.clone(),
        })
    }
}

#[async_trait]
impl MessageChannel for RedisStreamChannel {
    async fn read(&self) -> Result<Vec<Record>, ChannelError> {
        let mut conn = self.connection.clone();
        let options = StreamReadOptions::default().count(self.consumer.max_batch);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.stream.as_str()], &["0"], &options)
            .await?;
        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default();
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            match decode_entry(entry) {
                Ok(record) => records.push(record),
                Err(e) => warn!(stream = %self.stream, id = %entry.id, error = %e, "Dropping malformed entry"),
            }
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        conn.xdel::<_, _, ()>(&self.stream, ids.as_slice()).await?;

        Ok(records)
    }

    async fn write(&self, record: &Record) -> Result<(), ChannelError> {
        let mut conn = self.connection.clone();
        let payload = serde_json::to_string(record)?;
        let items = [(PAYLOAD_FIELD, payload)];

        match self.producer.max_len {
            Some(max_len) => {
                conn.xadd_maxlen::<_, _, _, _, ()>(&self.stream, StreamMaxlen::Approx(max_len), "*", &items)
                    .await?
            }
            None => conn.xadd::<_, _, _, _, ()>(&self.stream, "*", &items).await?,
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("RedisStreamChannel: stream={}, url={}", self.stream, self.url)
    }
}
