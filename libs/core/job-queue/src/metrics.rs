//! Prometheus metrics for the job queue
//!
//! Provides observability into publishing, acknowledgment and deduplication.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

use crate::error::{QueueError, QueueResult};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> QueueResult<()> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| QueueError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;
        info!("Prometheus metrics initialized");
        Ok::<_, QueueError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Outcome label for publish attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Success,
    Failed,
}

impl PublishStatus {
    fn as_str(self) -> &'static str {
        match self {
            PublishStatus::Success => "success",
            PublishStatus::Failed => "failed",
        }
    }
}

/// Record records appended to (or rejected by) a stream
pub fn record_published(stream: &str, status: PublishStatus, count: usize) {
    counter!(
        "job_queue_published_total",
        "stream" => stream.to_string(),
        "status" => status.as_str()
    )
    .increment(count as u64);
}

/// Record acknowledged entries
pub fn record_acknowledged(stream: &str, count: u64) {
    counter!("job_queue_acknowledged_total", "stream" => stream.to_string()).increment(count);
}

/// Record an entry skipped because it could not be decoded
pub fn record_decode_skipped(stream: &str) {
    counter!("job_queue_decode_skipped_total", "stream" => stream.to_string()).increment(1);
}

/// Record messages dropped by the router
pub fn record_unroutable(count: usize) {
    counter!("job_queue_unroutable_total").increment(count as u64);
}

/// Record the size of a fetched batch
pub fn record_batch_size(stream: &str, size: usize) {
    histogram!("job_queue_batch_size", "stream" => stream.to_string()).record(size as f64);
}

/// Record keys found to be new by a duplicate filter
pub fn record_dedup_new(set: &str, count: usize) {
    counter!("job_queue_dedup_new_total", "set" => set.to_string()).increment(count as u64);
}
