//! Job Queue
//!
//! A reliability layer for moving job records through Redis Streams.
//!
//! ## Features
//!
//! - **Publisher**: bounded streams (`MAXLEN ~`), atomic batch publishing
//! - **Consumer / ConsumerCombiner**: consumer groups over one or many streams, explicit acknowledgment
//! - **PublisherRouter**: send each record to a stream chosen by one of its fields
//! - **DuplicateFilter**: rolling-TTL set of already processed keys
//! - **PriorityScheduler**: fan-in, reorder by job type, republish, acknowledge
//! - **Prometheus metrics** and **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use database::redis::{RedisConfig, RedisConnection};
//! use job_queue::{ConsumerCombiner, PriorityScheduler, Publisher};
//!
//! let connection = Arc::new(RedisConnection::new(RedisConfig::from_env()?));
//! connection.connect().await?;
//!
//! let source = ConsumerCombiner::new(connection.clone(), input_streams, "prioritiser")?;
//! let sink = Publisher::new(connection.clone(), "prioritised_jobs");
//!
//! PriorityScheduler::new(source, sink).run(shutdown_rx).await?;
//! ```

mod combiner;
mod consumer;
mod dedup;
mod error;
mod health;
mod ingest;
pub mod metrics;
mod publisher;
mod record;
mod router;
mod scheduler;
#[cfg(test)]
mod testing;
mod traits;

// Re-export main types
pub use combiner::{ConsumerCombiner, default_consumer_name};
pub use consumer::{Consumer, DEFAULT_BLOCK_MS, GroupStart};
pub use dedup::{DEFAULT_TTL_SECS, DuplicateFilter};
pub use error::{QueueError, QueueResult};
pub use health::{HealthState, StreamStats, health_router};
pub use ingest::{Candidate, DEFAULT_INGEST_BATCH_SIZE, IngestConfig, IngestCycle, IngestReport};
pub use metrics::init_metrics;
pub use publisher::{DEFAULT_MAX_LENGTH, Publisher};
pub use record::{
    JobKind, JobPayload, JobRecord, MessageHeader, PAYLOAD_FIELD, StreamRecord, UrlPayload,
    message_id_for,
};
pub use router::{PublisherRouter, RouteSummary};
pub use scheduler::{
    CycleReport, DEFAULT_BATCH_SIZE, Priority, PriorityMap, PriorityScheduler, SchedulerConfig,
    prioritize,
};
pub use traits::{RecordSink, RecordSource, SeenFilter};
