//! Seams between the control loops and the broker
//!
//! The scheduler and the ingestion cycle only talk to these traits, so their
//! ordering and failure handling can be exercised without a broker.

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::record::{JobRecord, StreamRecord};

/// Where a scheduler pulls work from
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Prepare the source before the first read (create consumer groups, ...)
    async fn prepare(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Read never-delivered records, up to `count` from each underlying stream
    ///
    /// Every returned record is already pending for this reader.
    async fn fetch(&self, count: usize) -> QueueResult<Vec<StreamRecord>>;

    /// Retire a delivered record. Returns the number of entries acknowledged.
    async fn acknowledge(&self, stream: &str, id: &str) -> QueueResult<u64>;

    /// Take over records left pending by other consumers for at least `min_idle_ms`
    async fn reclaim(&self, _min_idle_ms: u64, _count: usize) -> QueueResult<Vec<StreamRecord>> {
        Ok(Vec::new())
    }
}

/// Where records are published to
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one record and return its broker id
    async fn publish(&self, record: &JobRecord) -> QueueResult<String>;

    /// Append all records or none; ids are returned in input order
    async fn publish_batch(&self, records: &[JobRecord]) -> QueueResult<Vec<String>>;
}

/// Membership test over already processed keys
#[async_trait]
pub trait SeenFilter: Send + Sync {
    /// Keys from `keys` not seen yet, in input order
    async fn unseen(&self, keys: &[String]) -> QueueResult<Vec<String>>;

    /// Remember `keys` as seen
    async fn mark_seen(&self, keys: &[String]) -> QueueResult<()>;
}
