//! Priority scheduler
//!
//! Pulls a bounded batch from the input streams, orders it by job priority and
//! republishes it to a single output stream. A record is acknowledged on its
//! origin stream only after it was published, so a crash or a failed publish
//! leaves it pending there (at-least-once).
//!
//! ```text
//! input streams ──▶ RecordSource::fetch ──▶ prioritize ──▶ RecordSink::publish ──▶ output stream
//!                        ▲                                        │ ok
//!                        └────────────── acknowledge ◀────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::record::{JobKind, StreamRecord};
use crate::traits::{RecordSink, RecordSource};

/// Default number of records pulled per cycle
pub const DEFAULT_BATCH_SIZE: usize = 10;

const MAX_BACKOFF_SECS: u64 = 30;

/// Rank of a job type; lower runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u32);

impl Priority {
    /// Rank given to types missing from the map
    pub const LOWEST: Priority = Priority(u32::MAX);

    pub fn new(rank: u32) -> Self {
        Priority(rank)
    }

    pub fn rank(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Priority::LOWEST {
            f.write_str("lowest")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Static mapping from job type to rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityMap {
    ranks: HashMap<String, Priority>,
}

impl PriorityMap {
    /// An empty map; every type gets [`Priority::LOWEST`]
    pub fn empty() -> Self {
        Self {
            ranks: HashMap::new(),
        }
    }

    pub fn with_rank(mut self, job_type: impl Into<String>, rank: u32) -> Self {
        self.ranks.insert(job_type.into(), Priority(rank));
        self
    }

    /// Rank of a record's type; missing or unmapped types get [`Priority::LOWEST`]
    pub fn rank_of(&self, job_type: Option<&JobKind>) -> Priority {
        job_type
            .and_then(|kind| self.ranks.get(kind.as_str()))
            .copied()
            .unwrap_or(Priority::LOWEST)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

impl Default for PriorityMap {
    /// `user:1, admin:1, background:2, logging:3`
    fn default() -> Self {
        Self::empty()
            .with_rank(JobKind::User.as_str(), 1)
            .with_rank(JobKind::Admin.as_str(), 1)
            .with_rank(JobKind::Background.as_str(), 2)
            .with_rank(JobKind::Logging.as_str(), 3)
    }
}

impl FromStr for PriorityMap {
    type Err = QueueError;

    /// Parse `type:rank` pairs separated by commas, e.g. `user:1,background:2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut map = Self::empty();

        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (job_type, rank) = pair
                .split_once(':')
                .ok_or_else(|| QueueError::Config(format!("expected type:rank, got '{}'", pair)))?;

            let job_type = job_type.trim();
            if job_type.is_empty() {
                return Err(QueueError::Config(format!("missing job type in '{}'", pair)));
            }

            let rank: u32 = rank
                .trim()
                .parse()
                .map_err(|e| QueueError::Config(format!("invalid rank in '{}': {}", pair, e)))?;

            map = map.with_rank(job_type, rank);
        }

        if map.is_empty() {
            return Err(QueueError::Config("priority map must not be empty".to_string()));
        }

        Ok(map)
    }
}

/// Stable sort of `batch` by ascending rank
///
/// Records of equal rank keep their fetch order.
pub fn prioritize(mut batch: Vec<StreamRecord>, priorities: &PriorityMap) -> Vec<StreamRecord> {
    batch.sort_by_key(|item| priorities.rank_of(item.record.job_type()));
    batch
}

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Records requested per input stream each cycle
    pub batch_size: usize,

    /// Reclaim entries pending longer than this before reading new ones.
    /// Disabled when `None`.
    pub reclaim_idle_ms: Option<u64>,
}

impl SchedulerConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_reclaim_idle_ms(mut self, idle_ms: Option<u64>) -> Self {
        self.reclaim_idle_ms = idle_ms;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            reclaim_idle_ms: None,
        }
    }
}

/// Result of one scheduling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records pulled from the source
    pub fetched: usize,
    /// Records published to the output
    pub published: usize,
    /// Published records acknowledged on their origin stream
    pub acknowledged: usize,
    /// Records left pending because publishing failed
    pub skipped: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

/// Consumes from a [`RecordSource`], reorders, republishes to a [`RecordSink`]
pub struct PriorityScheduler<S, K> {
    source: S,
    sink: K,
    priorities: PriorityMap,
    config: SchedulerConfig,
}

impl<S, K> PriorityScheduler<S, K>
where
    S: RecordSource,
    K: RecordSink,
{
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            sink,
            priorities: PriorityMap::default(),
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_priorities(mut self, priorities: PriorityMap) -> Self {
        self.priorities = priorities;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn priorities(&self) -> &PriorityMap {
        &self.priorities
    }

    /// Run one Idle → Dispatching → Idle transition
    ///
    /// Read failures are returned. Publish and acknowledge failures are
    /// logged per record and never abort the batch.
    pub async fn run_cycle(&self) -> QueueResult<CycleReport> {
        let batch = self.next_batch().await?;
        let mut report = CycleReport {
            fetched: batch.len(),
            ..CycleReport::default()
        };

        if batch.is_empty() {
            return Ok(report);
        }

        debug!(fetched = report.fetched, "Dispatching batch");

        for item in prioritize(batch, &self.priorities) {
            if let Err(e) = self.sink.publish(&item.record).await {
                warn!(
                    stream = %item.stream,
                    record_id = %item.id,
                    message_id = %item.record.message_id(),
                    error = %e,
                    "Publish failed, leaving record pending"
                );
                report.skipped += 1;
                continue;
            }
            report.published += 1;

            match self.source.acknowledge(&item.stream, &item.id).await {
                Ok(0) => {}
                Ok(_) => report.acknowledged += 1,
                Err(e) => {
                    error!(
                        stream = %item.stream,
                        record_id = %item.id,
                        error = %e,
                        "Acknowledge failed after publish, record may be delivered twice"
                    );
                }
            }
        }

        info!(
            fetched = report.fetched,
            published = report.published,
            acknowledged = report.acknowledged,
            skipped = report.skipped,
            "Batch dispatched"
        );

        Ok(report)
    }

    /// Run cycles until `shutdown` turns true
    ///
    /// Shutdown is checked between cycles. Transport errors back off
    /// exponentially up to 30 seconds; a missing consumer group is recreated.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        info!(
            batch_size = self.config.batch_size,
            reclaim_idle_ms = ?self.config.reclaim_idle_ms,
            priorities = self.priorities.len(),
            "Starting priority scheduler"
        );

        self.source.prepare().await?;

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping scheduler");
                break;
            }

            match self.run_cycle().await {
                Ok(_) => {
                    if consecutive_errors > 0 {
                        info!("Recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                }
                Err(e) if e.is_nogroup() => {
                    warn!(error = %e, "Consumer group missing, recreating");
                    if let Err(create_err) = self.source.prepare().await {
                        error!(error = %create_err, "Failed to recreate consumer group");
                    }
                }
                Err(e) if e.is_transport() => {
                    consecutive_errors += 1;
                    let backoff = backoff_for(consecutive_errors);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_secs = backoff.as_secs(),
                        "Read failed, backing off"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Scheduler stopped on unrecoverable error");
                    return Err(e);
                }
            }
        }

        info!("Priority scheduler stopped");
        Ok(())
    }

    async fn next_batch(&self) -> QueueResult<Vec<StreamRecord>> {
        if let Some(idle_ms) = self.config.reclaim_idle_ms {
            match self.source.reclaim(idle_ms, self.config.batch_size).await {
                Ok(reclaimed) if !reclaimed.is_empty() => return Ok(reclaimed),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Reclaiming idle records failed"),
            }
        }

        self.source.fetch(self.config.batch_size).await
    }
}

fn backoff_for(consecutive_errors: u32) -> Duration {
    Duration::from_secs(2u64.pow(consecutive_errors.min(5)).min(MAX_BACKOFF_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{JobPayload, JobRecord};
    use crate::testing::{FakeSink, FakeSource};
    use serde_json::Map;

    fn item(stream: &str, id: &str, kind: Option<&str>) -> StreamRecord {
        StreamRecord::new(
            stream,
            id,
            JobRecord::new(id, kind.map(JobKind::from), JobPayload::Fields(Map::new())),
        )
    }

    fn types(batch: &[StreamRecord]) -> Vec<String> {
        batch
            .iter()
            .map(|i| i.record.job_type().map(|k| k.to_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_default_priority_map() {
        let map = PriorityMap::default();
        assert_eq!(map.rank_of(Some(&JobKind::User)), Priority::new(1));
        assert_eq!(map.rank_of(Some(&JobKind::Admin)), Priority::new(1));
        assert_eq!(map.rank_of(Some(&JobKind::Background)), Priority::new(2));
        assert_eq!(map.rank_of(Some(&JobKind::Logging)), Priority::new(3));
        assert_eq!(map.rank_of(Some(&JobKind::from("reindex"))), Priority::LOWEST);
        assert_eq!(map.rank_of(None), Priority::LOWEST);
    }

    #[test]
    fn test_parse_priority_map() {
        let map: PriorityMap = "user:1, background:2 ,logging:3".parse().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.rank_of(Some(&JobKind::Background)), Priority::new(2));
        assert_eq!(map.rank_of(Some(&JobKind::Admin)), Priority::LOWEST);

        assert!("user".parse::<PriorityMap>().is_err());
        assert!("user:high".parse::<PriorityMap>().is_err());
        assert!(":1".parse::<PriorityMap>().is_err());
        assert!(" , ".parse::<PriorityMap>().is_err());
    }

    #[test]
    fn test_lowest_sorts_last() {
        assert!(Priority::new(u32::MAX - 1) < Priority::LOWEST);
        assert_eq!(Priority::LOWEST.to_string(), "lowest");
    }

    #[test]
    fn test_prioritize_orders_by_rank() {
        let map = PriorityMap::empty()
            .with_rank("user", 1)
            .with_rank("background", 2)
            .with_rank("logging", 3);
        let batch = vec![
            item("a", "1", Some("logging")),
            item("a", "2", Some("user")),
            item("b", "3", Some("background")),
            item("b", "4", Some("unknown")),
        ];

        let sorted = prioritize(batch, &map);
        assert_eq!(types(&sorted), vec!["user", "background", "logging", "unknown"]);
    }

    #[test]
    fn test_prioritize_is_stable() {
        let batch = vec![
            item("a", "1", Some("background")),
            item("b", "2", Some("user")),
            item("a", "3", Some("background")),
            item("b", "4", Some("user")),
            item("a", "5", None),
            item("b", "6", None),
        ];

        let ids: Vec<String> = prioritize(batch, &PriorityMap::default())
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["2", "4", "1", "3", "5", "6"]);
    }

    #[tokio::test]
    async fn test_empty_fetch_is_noop() {
        let scheduler = PriorityScheduler::new(FakeSource::default(), FakeSink::default());
        let report = scheduler.run_cycle().await.unwrap();

        assert!(report.is_idle());
        assert_eq!(report, CycleReport::default());
        assert!(scheduler.sink().published().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_publishes_in_priority_order_and_acks() {
        let source = FakeSource::with_batches(vec![vec![
            item("in:a", "1-0", Some("logging")),
            item("in:b", "1-0", Some("background")),
            item("in:a", "2-0", Some("user")),
        ]]);
        let scheduler = PriorityScheduler::new(source, FakeSink::default());

        let report = scheduler.run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport {
                fetched: 3,
                published: 3,
                acknowledged: 3,
                skipped: 0
            }
        );
        let published: Vec<String> = scheduler
            .sink()
            .published()
            .iter()
            .map(|r| r.job_type().unwrap().to_string())
            .collect();
        assert_eq!(published, vec!["user", "background", "logging"]);
        assert_eq!(
            scheduler.source().acked(),
            vec![
                ("in:a".to_string(), "2-0".to_string()),
                ("in:b".to_string(), "1-0".to_string()),
                ("in:a".to_string(), "1-0".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_record_pending() {
        let source = FakeSource::with_batches(vec![vec![
            item("in", "r1", Some("user")),
            item("in", "r2", Some("user")),
            item("in", "r3", Some("user")),
        ]]);
        let scheduler = PriorityScheduler::new(source, FakeSink::failing_on(["r2"]));

        let report = scheduler.run_cycle().await.unwrap();

        assert_eq!(report.published, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(scheduler.source().acked_ids(), vec!["r1", "r3"]);
        assert_eq!(scheduler.sink().published_ids(), vec!["r1", "r3"]);
    }

    #[tokio::test]
    async fn test_failed_ack_does_not_unpublish() {
        let source = FakeSource::with_batches(vec![vec![
            item("in", "r1", Some("user")),
            item("in", "r2", Some("user")),
        ]])
        .failing_ack_for(&["r1"]);
        let scheduler = PriorityScheduler::new(source, FakeSink::default());

        let report = scheduler.run_cycle().await.unwrap();

        assert_eq!(report.published, 2);
        assert_eq!(report.acknowledged, 1);
        assert_eq!(scheduler.sink().published_ids(), vec!["r1", "r2"]);
        assert_eq!(scheduler.source().acked_ids(), vec!["r2"]);
    }

    #[tokio::test]
    async fn test_batch_size_limits_fetch() {
        let source = FakeSource::with_batches(vec![(0..5)
            .map(|n| item("in", &n.to_string(), Some("user")))
            .collect()]);
        let scheduler = PriorityScheduler::new(source, FakeSink::default())
            .with_config(SchedulerConfig::default().with_batch_size(2));

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 2);
    }

    #[tokio::test]
    async fn test_reclaimed_records_are_dispatched_first() {
        let source = FakeSource::with_batches(vec![vec![item("in", "new", Some("user"))]])
            .with_reclaimable(vec![item("in", "old", Some("logging"))]);
        let scheduler = PriorityScheduler::new(source, FakeSink::default())
            .with_config(SchedulerConfig::default().with_reclaim_idle_ms(Some(60_000)));

        scheduler.run_cycle().await.unwrap();
        assert_eq!(scheduler.sink().published_ids(), vec!["old"]);

        scheduler.run_cycle().await.unwrap();
        assert_eq!(scheduler.sink().published_ids(), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_reclaim_is_off_by_default() {
        let source = FakeSource::with_batches(vec![vec![item("in", "new", Some("user"))]])
            .with_reclaimable(vec![item("in", "old", Some("logging"))]);
        let scheduler = PriorityScheduler::new(source, FakeSink::default());

        scheduler.run_cycle().await.unwrap();
        assert_eq!(scheduler.sink().published_ids(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_run_returns_when_already_shut_down() {
        let scheduler = PriorityScheduler::new(FakeSource::default(), FakeSink::default());
        let (_tx, rx) = watch::channel(true);

        scheduler.run(rx).await.unwrap();
        assert_eq!(scheduler.source().prepare_calls(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_then_stops_on_signal() {
        let source = FakeSource::with_batches(vec![
            vec![item("in", "1", Some("logging")), item("in", "2", Some("user"))],
            vec![item("in", "3", Some("admin"))],
        ]);
        let scheduler = std::sync::Arc::new(PriorityScheduler::new(source, FakeSink::default()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        while scheduler.sink().published().len() < 3 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.sink().published_ids(), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_for(1), Duration::from_secs(2));
        assert_eq!(backoff_for(4), Duration::from_secs(16));
        assert_eq!(backoff_for(10), Duration::from_secs(30));
    }
}
