//! Fan-in reader over several streams
//!
//! One consumer identity reads from many streams under a shared group name
//! with a single blocking `XREADGROUP`. Pending lists are kept per stream, so
//! acknowledging needs both the stream and the entry ID.

use async_trait::async_trait;
use database::redis::RedisConnection;
use std::sync::Arc;
use tracing::info;

use crate::consumer::{
    ClaimCursors, DEFAULT_BLOCK_MS, GroupStart, ack, auto_claim, create_group, read_group,
    require_non_empty,
};
use crate::error::{QueueError, QueueResult};
use crate::record::StreamRecord;
use crate::traits::RecordSource;

/// Consumer identity unique to this host and process: `<hostname>-<pid>`
pub fn default_consumer_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Multi-stream consumer sharing one group and one consumer identity
pub struct ConsumerCombiner {
    connection: Arc<RedisConnection>,
    streams: Vec<String>,
    group_name: String,
    consumer_name: String,
    start: GroupStart,
    block_ms: u64,
    claim_cursors: ClaimCursors,
}

impl ConsumerCombiner {
    /// Create a combiner over `streams`
    ///
    /// Rejects an empty stream list, an empty stream name or an empty group
    /// name. Groups created by the combiner start from the beginning of each
    /// stream unless changed with [`with_start`](Self::with_start).
    pub fn new(
        connection: Arc<RedisConnection>,
        streams: Vec<String>,
        group_name: impl Into<String>,
    ) -> QueueResult<Self> {
        let group_name = group_name.into();

        if streams.is_empty() {
            return Err(QueueError::invalid_argument("streams must not be empty"));
        }
        for stream in &streams {
            require_non_empty("stream name", stream)?;
        }
        require_non_empty("group name", &group_name)?;

        Ok(Self {
            connection,
            streams,
            group_name,
            consumer_name: default_consumer_name(),
            start: GroupStart::Beginning,
            block_ms: DEFAULT_BLOCK_MS,
            claim_cursors: ClaimCursors::default(),
        })
    }

    /// Override the consumer identity
    pub fn with_consumer_name(mut self, consumer_name: impl Into<String>) -> QueueResult<Self> {
        let consumer_name = consumer_name.into();
        require_non_empty("consumer name", &consumer_name)?;
        self.consumer_name = consumer_name;
        Ok(self)
    }

    pub fn with_start(mut self, start: GroupStart) -> Self {
        self.start = start;
        self
    }

    /// Set the wait used when driven as a [`RecordSource`]
    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms;
        self
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn block_ms(&self) -> u64 {
        self.block_ms
    }

    /// Create the group on every stream if missing
    pub async fn ensure_groups(&self) -> QueueResult<()> {
        let mut conn = self.connection.handle().await?;
        for stream in &self.streams {
            create_group(&mut conn, stream, &self.group_name, self.start).await?;
        }

        info!(
            streams = ?self.streams,
            group = %self.group_name,
            consumer = %self.consumer_name,
            "Consumer groups ready"
        );
        Ok(())
    }

    /// Read at most one new record from any stream
    pub async fn consume_one(&self, block_ms: u64) -> QueueResult<Option<StreamRecord>> {
        Ok(self.consume_many(1, block_ms).await?.into_iter().next())
    }

    /// Read up to `count` new records per stream in one call
    ///
    /// `COUNT` applies to each stream, so the result can hold up to
    /// `count * streams` records. All of them are returned: every delivered
    /// entry is already pending for this consumer and must reach the caller.
    pub async fn consume_many(&self, count: usize, block_ms: u64) -> QueueResult<Vec<StreamRecord>> {
        let mut conn = self.connection.blocking_handle().await?;
        read_group(
            &mut conn,
            &self.group_name,
            &self.consumer_name,
            &self.streams,
            count,
            block_ms,
        )
        .await
    }

    /// Remove `record_id` from the pending list of `stream`
    pub async fn acknowledge(&self, stream: &str, record_id: &str) -> QueueResult<u64> {
        let mut conn = self.connection.handle().await?;
        ack(&mut conn, stream, &self.group_name, record_id).await
    }

    /// Take over up to `count` entries idle for at least `min_idle_ms`, across all streams
    pub async fn claim_idle(&self, min_idle_ms: u64, count: usize) -> QueueResult<Vec<StreamRecord>> {
        let mut conn = self.connection.handle().await?;
        let mut claimed = Vec::new();

        for stream in &self.streams {
            let remaining = count.saturating_sub(claimed.len());
            if remaining == 0 {
                break;
            }
            claimed.extend(
                auto_claim(
                    &mut conn,
                    stream,
                    &self.group_name,
                    &self.consumer_name,
                    min_idle_ms,
                    remaining,
                    &self.claim_cursors,
                )
                .await?,
            );
        }

        Ok(claimed)
    }
}

#[async_trait]
impl RecordSource for ConsumerCombiner {
    async fn prepare(&self) -> QueueResult<()> {
        self.ensure_groups().await
    }

    async fn fetch(&self, count: usize) -> QueueResult<Vec<StreamRecord>> {
        self.consume_many(count, self.block_ms).await
    }

    async fn acknowledge(&self, stream: &str, id: &str) -> QueueResult<u64> {
        ConsumerCombiner::acknowledge(self, stream, id).await
    }

    async fn reclaim(&self, min_idle_ms: u64, count: usize) -> QueueResult<Vec<StreamRecord>> {
        self.claim_idle(min_idle_ms, count).await
    }
}
