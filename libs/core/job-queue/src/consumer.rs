//! Consumer-group reader for a single stream
//!
//! Reads never-delivered (`>`) entries for one consumer identity within a
//! group. Entries stay in the group's pending list until acknowledged, which
//! gives at-least-once delivery.

use async_trait::async_trait;
use database::redis::{ConnectionManager, RedisConnection, RedisResult};
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult, is_busy_group};
use crate::metrics;
use crate::record::{JobRecord, PAYLOAD_FIELD, StreamRecord};
use crate::traits::RecordSource;

/// Default wait for a blocking read
pub const DEFAULT_BLOCK_MS: u64 = 5_000;

/// Cursor that starts an `XAUTOCLAIM` scan at the head of the pending list
const SCAN_START: &str = "0-0";

/// Where a newly created group starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupStart {
    /// Only entries appended after the group was created (`$`)
    #[default]
    NewOnly,
    /// Every entry still in the stream (`0`)
    Beginning,
}

impl GroupStart {
    pub fn as_id(self) -> &'static str {
        match self {
            GroupStart::NewOnly => "$",
            GroupStart::Beginning => "0",
        }
    }
}

/// Stream consumer bound to one stream, one group and one consumer name
pub struct Consumer {
    connection: Arc<RedisConnection>,
    stream_name: String,
    group_name: String,
    consumer_name: String,
    start: GroupStart,
    block_ms: u64,
    claim_cursors: ClaimCursors,
}

impl Consumer {
    /// Create a new Consumer. All names must be non-empty.
    pub fn new(
        connection: Arc<RedisConnection>,
        stream_name: impl Into<String>,
        group_name: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> QueueResult<Self> {
        let stream_name = stream_name.into();
        let group_name = group_name.into();
        let consumer_name = consumer_name.into();

        require_non_empty("stream name", &stream_name)?;
        require_non_empty("group name", &group_name)?;
        require_non_empty("consumer name", &consumer_name)?;

        Ok(Self {
            connection,
            stream_name,
            group_name,
            consumer_name,
            start: GroupStart::NewOnly,
            block_ms: DEFAULT_BLOCK_MS,
            claim_cursors: ClaimCursors::default(),
        })
    }

    /// Set where the group starts if this consumer creates it
    pub fn with_start(mut self, start: GroupStart) -> Self {
        self.start = start;
        self
    }

    /// Set the wait used when driven as a [`RecordSource`]
    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms;
        self
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Create the consumer group (and the stream) if missing
    ///
    /// Safe to call repeatedly; an existing group keeps its cursor.
    pub async fn ensure_group(&self) -> QueueResult<()> {
        let mut conn = self.connection.handle().await?;
        create_group(&mut conn, &self.stream_name, &self.group_name, self.start).await
    }

    /// Read at most one new record, waiting up to `block_ms` (0 waits forever)
    pub async fn consume_one(&self, block_ms: u64) -> QueueResult<Option<StreamRecord>> {
        Ok(self.consume_many(1, block_ms).await?.into_iter().next())
    }

    /// Read up to `count` new records, waiting up to `block_ms` (0 waits forever)
    ///
    /// Entries that fail to decode are logged and left out of the result.
    pub async fn consume_many(&self, count: usize, block_ms: u64) -> QueueResult<Vec<StreamRecord>> {
        let mut conn = self.connection.blocking_handle().await?;
        read_group(
            &mut conn,
            &self.group_name,
            &self.consumer_name,
            std::slice::from_ref(&self.stream_name),
            count,
            block_ms,
        )
        .await
    }

    /// Remove `record_id` from the group's pending list
    ///
    /// Returns the number of entries acknowledged; 0 means the ID was not pending.
    pub async fn acknowledge(&self, record_id: &str) -> QueueResult<u64> {
        let mut conn = self.connection.handle().await?;
        ack(&mut conn, &self.stream_name, &self.group_name, record_id).await
    }

    /// Take over up to `count` entries pending for at least `min_idle_ms`
    ///
    /// Each call resumes the pending-list scan where the previous one stopped.
    pub async fn claim_idle(&self, min_idle_ms: u64, count: usize) -> QueueResult<Vec<StreamRecord>> {
        let mut conn = self.connection.handle().await?;
        auto_claim(
            &mut conn,
            &self.stream_name,
            &self.group_name,
            &self.consumer_name,
            min_idle_ms,
            count,
            &self.claim_cursors,
        )
        .await
    }
}

#[async_trait]
impl RecordSource for Consumer {
    async fn prepare(&self) -> QueueResult<()> {
        self.ensure_group().await
    }

    async fn fetch(&self, count: usize) -> QueueResult<Vec<StreamRecord>> {
        self.consume_many(count, self.block_ms).await
    }

    async fn acknowledge(&self, stream: &str, id: &str) -> QueueResult<u64> {
        if stream != self.stream_name {
            return Err(QueueError::invalid_argument(format!(
                "consumer of '{}' cannot acknowledge entries of '{}'",
                self.stream_name, stream
            )));
        }
        Consumer::acknowledge(self, id).await
    }

    async fn reclaim(&self, min_idle_ms: u64, count: usize) -> QueueResult<Vec<StreamRecord>> {
        self.claim_idle(min_idle_ms, count).await
    }
}

pub(crate) fn require_non_empty(what: &str, value: &str) -> QueueResult<()> {
    if value.trim().is_empty() {
        return Err(QueueError::invalid_argument(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// `XGROUP CREATE ... MKSTREAM`, treating `BUSYGROUP` as success
pub(crate) async fn create_group(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    start: GroupStart,
) -> QueueResult<()> {
    let result: RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg(start.as_id())
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match result {
        Ok(()) => {
            info!(stream = %stream, group = %group, start = start.as_id(), "Created consumer group");
            Ok(())
        }
        Err(e) if is_busy_group(&e) => {
            debug!(stream = %stream, group = %group, "Consumer group already exists");
            Ok(())
        }
        Err(e) => Err(QueueError::Redis(e)),
    }
}

/// One `XREADGROUP` over every stream in `streams`, flattened in reply order
pub(crate) async fn read_group(
    conn: &mut ConnectionManager,
    group: &str,
    consumer: &str,
    streams: &[String],
    count: usize,
    block_ms: u64,
) -> QueueResult<Vec<StreamRecord>> {
    if count == 0 {
        return Err(QueueError::invalid_argument("count must be at least 1"));
    }

    let mut cmd = redis::cmd("XREADGROUP");
    cmd.arg("GROUP")
        .arg(group)
        .arg(consumer)
        .arg("COUNT")
        .arg(count)
        .arg("BLOCK")
        .arg(block_ms)
        .arg("STREAMS");
    for stream in streams {
        cmd.arg(stream);
    }
    for _ in streams {
        cmd.arg(">");
    }

    // Nil when the wait elapsed without new entries
    let reply: Option<StreamReadReply> = cmd.query_async(conn).await?;
    let Some(reply) = reply else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for key in reply.keys {
        let stream = key.key;
        metrics::record_batch_size(&stream, key.ids.len());
        records.extend(
            key.ids
                .into_iter()
                .filter_map(|entry| decode_entry(&stream, entry)),
        );
    }

    Ok(records)
}

/// `XACK` one entry; logs a warning when nothing was pending under that ID
pub(crate) async fn ack(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    record_id: &str,
) -> QueueResult<u64> {
    let acknowledged: u64 = redis::cmd("XACK")
        .arg(stream)
        .arg(group)
        .arg(record_id)
        .query_async(conn)
        .await?;

    if acknowledged == 0 {
        warn!(
            stream = %stream,
            group = %group,
            record_id = %record_id,
            "Acknowledged ID was not pending"
        );
    } else {
        debug!(stream = %stream, record_id = %record_id, "Acknowledged record");
        metrics::record_acknowledged(stream, acknowledged);
    }

    Ok(acknowledged)
}

/// Per-stream `XAUTOCLAIM` resume points
///
/// Undecodable entries are never acknowledged, so they stay at the head of
/// the pending list. Resuming from the returned cursor keeps them from hiding
/// the entries behind them; a scan that reaches the end restarts at `0-0`.
#[derive(Debug, Default)]
pub(crate) struct ClaimCursors(Mutex<HashMap<String, String>>);

impl ClaimCursors {
    pub(crate) fn start(&self, stream: &str) -> String {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .cloned()
            .unwrap_or_else(|| SCAN_START.to_string())
    }

    pub(crate) fn advance(&self, stream: &str, next: String) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream.to_string(), next);
    }
}

/// `XAUTOCLAIM` entries idle for at least `min_idle_ms`, resuming at the stream's cursor
pub(crate) async fn auto_claim(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle_ms: u64,
    count: usize,
    cursors: &ClaimCursors,
) -> QueueResult<Vec<StreamRecord>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let start = cursors.start(stream);
    let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
        .arg(stream)
        .arg(group)
        .arg(consumer)
        .arg(min_idle_ms)
        .arg(&start)
        .arg("COUNT")
        .arg(count)
        .query_async(conn)
        .await?;

    debug!(stream = %stream, from = %start, next = %reply.next_stream_id, "Pending list scanned");
    cursors.advance(stream, reply.next_stream_id);

    let records: Vec<StreamRecord> = reply
        .claimed
        .into_iter()
        .filter_map(|entry| decode_entry(stream, entry))
        .collect();

    if !records.is_empty() {
        warn!(
            stream = %stream,
            group = %group,
            count = records.len(),
            "Claimed idle pending records"
        );
    }

    Ok(records)
}

/// Decode one stream entry, logging and skipping it on failure
fn decode_entry(stream: &str, entry: StreamId) -> Option<StreamRecord> {
    let Some(payload) = entry.get::<String>(PAYLOAD_FIELD) else {
        warn!(
            stream = %stream,
            record_id = %entry.id,
            fields = ?entry.map.keys().collect::<Vec<_>>(),
            "Missing 'payload' field in entry, skipping"
        );
        metrics::record_decode_skipped(stream);
        return None;
    };

    match JobRecord::from_payload(&entry.id, &payload) {
        Ok(record) => Some(StreamRecord::new(stream, entry.id, record)),
        Err(e) => {
            warn!(stream = %stream, record_id = %entry.id, error = %e, "Failed to decode record, skipping");
            metrics::record_decode_skipped(stream);
            None
        }
    }
}
