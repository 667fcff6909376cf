//! Ingestion cycle
//!
//! Turns a list of discovered links into job records, skipping links that
//! were already published recently. Links are remembered only after their
//! records were published, so a failed publish is retried by the next cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::error::QueueResult;
use crate::record::{JobKind, JobRecord};
use crate::traits::{RecordSink, SeenFilter};

/// Default number of records per published batch
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 100;

/// A discovered link and the feed it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub link: String,
    pub source: String,
}

impl Candidate {
    pub fn new(link: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            source: source.into(),
        }
    }

    fn is_valid(&self) -> bool {
        !self.link.trim().is_empty() && !self.source.trim().is_empty()
    }
}

/// Ingestion tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Records per `publish_batch` call
    pub batch_size: usize,

    /// Type stamped on every produced record
    pub job_kind: JobKind,
}

impl IngestConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_job_kind(mut self, kind: JobKind) -> Self {
        self.job_kind = kind;
        self
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_INGEST_BATCH_SIZE,
            job_kind: JobKind::Background,
        }
    }
}

/// Result of one ingestion cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Candidates received
    pub total: usize,
    /// Candidates not seen before
    pub new: usize,
    /// Valid candidates already seen (including repeats within the input)
    pub seen: usize,
    /// Records published
    pub published: usize,
    /// New records whose batch failed to publish
    pub failed: usize,
}

/// One pass of filter, publish, remember
pub struct IngestCycle<F, K> {
    filter: F,
    sink: K,
    config: IngestConfig,
}

impl<F, K> IngestCycle<F, K>
where
    F: SeenFilter,
    K: RecordSink,
{
    pub fn new(filter: F, sink: K) -> Self {
        Self {
            filter,
            sink,
            config: IngestConfig::default(),
        }
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Publish records for every candidate whose link was not seen yet
    ///
    /// Only a failing duplicate-filter lookup is returned as an error; publish
    /// failures are reported in [`IngestReport::failed`].
    pub async fn run(&self, candidates: Vec<Candidate>) -> QueueResult<IngestReport> {
        let mut report = IngestReport {
            total: candidates.len(),
            ..IngestReport::default()
        };

        let unique = dedup_candidates(candidates);
        if unique.is_empty() {
            debug!(total = report.total, "No valid candidates");
            return Ok(report);
        }

        let links: Vec<String> = unique.iter().map(|c| c.link.clone()).collect();
        let unseen: HashSet<String> = self.filter.unseen(&links).await?.into_iter().collect();

        let fresh: Vec<Candidate> = unique
            .into_iter()
            .filter(|c| unseen.contains(&c.link))
            .collect();

        report.new = fresh.len();
        report.seen = links.len() - fresh.len();
        report.failed = fresh.len();

        for chunk in fresh.chunks(self.config.batch_size) {
            let records: Vec<JobRecord> = chunk
                .iter()
                .map(|c| JobRecord::url_job(&c.link, &c.source, self.config.job_kind.clone()))
                .collect();

            if let Err(e) = self.sink.publish_batch(&records).await {
                warn!(count = records.len(), error = %e, "Failed to publish ingested batch");
                continue;
            }
            report.published += records.len();
            report.failed -= records.len();

            let published_links: Vec<String> = chunk.iter().map(|c| c.link.clone()).collect();
            if let Err(e) = self.filter.mark_seen(&published_links).await {
                error!(
                    count = published_links.len(),
                    error = %e,
                    "Published links could not be remembered, they may be published again"
                );
            }
        }

        info!(
            total = report.total,
            new = report.new,
            seen = report.seen,
            published = report.published,
            failed = report.failed,
            "Ingestion cycle finished"
        );

        Ok(report)
    }
}

/// Drop invalid candidates and repeated links, keeping first occurrences in order
fn dedup_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut links = HashSet::new();
    candidates
        .into_iter()
        .filter(Candidate::is_valid)
        .filter(|c| links.insert(c.link.clone()))
        .collect()
}
