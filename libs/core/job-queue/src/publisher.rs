//! Stream publisher for job enqueuing
//!
//! Appends job records to a bounded stream. The stream is trimmed with
//! `MAXLEN ~`, so once it is over capacity the oldest entries are evicted.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_queue::Publisher;
//!
//! let publisher = Publisher::new(connection, "prioritised_jobs").with_max_length(1_000);
//!
//! // Non-throwing form: failures are logged and yield `None`
//! let id = publisher.publish_one(&record).await;
//!
//! // Propagating form
//! let id = publisher.send(&record).await?;
//! ```

use async_trait::async_trait;
use database::redis::{AsyncCommands, RedisConnection};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::metrics::{self, PublishStatus};
use crate::record::{JobRecord, PAYLOAD_FIELD};
use crate::traits::RecordSink;

/// Default approximate cap on the stream length
pub const DEFAULT_MAX_LENGTH: usize = 100;

/// Publisher bound to a single stream
#[derive(Clone)]
pub struct Publisher {
    connection: Arc<RedisConnection>,
    stream_name: String,
    max_length: usize,
}

impl Publisher {
    /// Create a new Publisher for a specific stream.
    pub fn new(connection: Arc<RedisConnection>, stream_name: impl Into<String>) -> Self {
        Self {
            connection,
            stream_name: stream_name.into(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Set the maximum stream length (MAXLEN ~).
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Get the stream name.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Append a record. Returns the stream entry ID.
    pub async fn send(&self, record: &JobRecord) -> QueueResult<String> {
        let payload = record.to_payload()?;
        let mut conn = self.connection.handle().await?;

        let entry_id: String = self
            .xadd_cmd(&payload)
            .query_async(&mut conn)
            .await?;

        debug!(
            stream = %self.stream_name,
            entry_id = %entry_id,
            message_id = %record.message_id(),
            "Published record"
        );

        Ok(entry_id)
    }

    /// Append every record in one `MULTI`/`EXEC` transaction.
    ///
    /// IDs are returned in input order. Either all records are appended or the
    /// call fails and none are. An empty batch is an invalid argument.
    pub async fn send_batch(&self, records: &[JobRecord]) -> QueueResult<Vec<String>> {
        if records.is_empty() {
            return Err(QueueError::invalid_argument("records must not be empty"));
        }

        // Encode everything before touching the broker
        let payloads = records
            .iter()
            .map(JobRecord::to_payload)
            .collect::<QueueResult<Vec<_>>>()?;

        let mut conn = self.connection.handle().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for payload in &payloads {
            pipe.add_command(self.xadd_cmd(payload));
        }

        let entry_ids: Vec<String> = pipe.query_async(&mut conn).await?;

        debug!(
            stream = %self.stream_name,
            count = entry_ids.len(),
            "Published batch of records"
        );

        Ok(entry_ids)
    }

    /// Append a record, logging instead of failing.
    ///
    /// Returns `None` when the record could not be encoded or the broker
    /// rejected it.
    pub async fn publish_one(&self, record: &JobRecord) -> Option<String> {
        match self.send(record).await {
            Ok(entry_id) => {
                metrics::record_published(&self.stream_name, PublishStatus::Success, 1);
                Some(entry_id)
            }
            Err(e) => {
                warn!(
                    stream = %self.stream_name,
                    message_id = %record.message_id(),
                    error = %e,
                    "Failed to publish record"
                );
                metrics::record_published(&self.stream_name, PublishStatus::Failed, 1);
                None
            }
        }
    }

    /// Append a batch atomically, logging instead of failing.
    ///
    /// Returns `Ok(None)` when the batch could not be encoded or the
    /// transaction failed; nothing was published in that case. An empty batch
    /// is still an error.
    pub async fn publish_many(&self, records: &[JobRecord]) -> QueueResult<Option<Vec<String>>> {
        match self.send_batch(records).await {
            Ok(entry_ids) => {
                metrics::record_published(&self.stream_name, PublishStatus::Success, entry_ids.len());
                Ok(Some(entry_ids))
            }
            Err(e @ QueueError::InvalidArgument(_)) => Err(e),
            Err(e) => {
                warn!(
                    stream = %self.stream_name,
                    count = records.len(),
                    error = %e,
                    "Failed to publish batch, nothing was appended"
                );
                metrics::record_published(&self.stream_name, PublishStatus::Failed, records.len());
                Ok(None)
            }
        }
    }

    /// Get the current stream length.
    pub async fn stream_length(&self) -> QueueResult<u64> {
        let mut conn = self.connection.handle().await?;
        let len: u64 = conn.xlen(&self.stream_name).await?;
        Ok(len)
    }

    fn xadd_cmd(&self, payload: &str) -> redis::Cmd {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload);
        cmd
    }
}

#[async_trait]
impl RecordSink for Publisher {
    async fn publish(&self, record: &JobRecord) -> QueueResult<String> {
        let result = self.send(record).await;
        let status = if result.is_ok() {
            PublishStatus::Success
        } else {
            PublishStatus::Failed
        };
        metrics::record_published(&self.stream_name, status, 1);
        result
    }

    async fn publish_batch(&self, records: &[JobRecord]) -> QueueResult<Vec<String>> {
        let result = self.send_batch(records).await;
        match &result {
            Ok(ids) => metrics::record_published(&self.stream_name, PublishStatus::Success, ids.len()),
            Err(_) => metrics::record_published(&self.stream_name, PublishStatus::Failed, records.len()),
        }
        result
    }
}
