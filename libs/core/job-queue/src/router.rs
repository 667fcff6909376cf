//! Field-based demultiplexing onto several streams
//!
//! The router looks a routing field up in each outgoing record and hands the
//! record to the publisher of the matching stream. Records without a route
//! are dropped with a warning.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_queue::PublisherRouter;
//!
//! let routes = HashMap::from([
//!     ("user".to_string(), "jobs:user".to_string()),
//!     ("logging".to_string(), "jobs:logging".to_string()),
//! ]);
//! let router = PublisherRouter::new(connection, routes, "header.type")?;
//! let summary = router.publish_many(&records).await?;
//! ```

use database::redis::RedisConnection;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::publisher::Publisher;
use crate::record::JobRecord;
use crate::traits::RecordSink;

/// Outcome of a routed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSummary {
    /// Successfully published records per destination stream
    pub published: BTreeMap<String, usize>,
    /// Records that matched no route
    pub unroutable: usize,
}

impl RouteSummary {
    pub fn total_published(&self) -> usize {
        self.published.values().sum()
    }
}

/// Routes records to one of several streams
pub struct PublisherRouter<K = Publisher> {
    routing_key: String,
    pointers: Vec<String>,
    routes: HashMap<String, String>,
    sinks: BTreeMap<String, K>,
}

impl PublisherRouter<Publisher> {
    /// Build a router from `{route value -> stream name}`
    ///
    /// `routing_key` names the record field holding the route value; nested
    /// fields use dots, e.g. `header.type`. A plain name such as `type` is
    /// looked up at the top level, then under `header`, then under `data`.
    pub fn new(
        connection: Arc<RedisConnection>,
        routes: HashMap<String, String>,
        routing_key: impl Into<String>,
    ) -> QueueResult<Self> {
        Self::with_sinks(routes, routing_key, |stream| {
            Publisher::new(connection.clone(), stream)
        })
    }
}

impl<K: RecordSink> PublisherRouter<K> {
    /// Build a router, creating one sink per distinct destination stream
    pub fn with_sinks(
        routes: HashMap<String, String>,
        routing_key: impl Into<String>,
        mut make_sink: impl FnMut(&str) -> K,
    ) -> QueueResult<Self> {
        let routing_key = routing_key.into();

        if routing_key.trim().is_empty() {
            return Err(QueueError::invalid_argument("routing key must not be empty"));
        }
        if routes.is_empty() {
            return Err(QueueError::invalid_argument("routes must not be empty"));
        }
        if routes.values().any(|stream| stream.trim().is_empty()) {
            return Err(QueueError::invalid_argument("route stream names must not be empty"));
        }

        let mut sinks = BTreeMap::new();
        for stream in routes.values() {
            sinks
                .entry(stream.clone())
                .or_insert_with(|| make_sink(stream));
        }

        let pointers = lookup_pointers(&routing_key);

        Ok(Self {
            routing_key,
            pointers,
            routes,
            sinks,
        })
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Destination stream for `record`, if any
    pub fn route_for(&self, record: &JobRecord) -> Option<&str> {
        let value = serde_json::to_value(record).ok()?;
        let route = self
            .pointers
            .iter()
            .find_map(|pointer| value.pointer(pointer).and_then(Value::as_str))?;
        self.routes.get(route).map(String::as_str)
    }

    /// Publish one record to its route
    ///
    /// Returns `None` when the record has no route or publishing failed; both
    /// are logged.
    pub async fn publish_one(&self, record: &JobRecord) -> Option<String> {
        let Some((stream, sink)) = self.sink_for(record) else {
            self.drop_unroutable(record);
            metrics::record_unroutable(1);
            return None;
        };

        match sink.publish(record).await {
            Ok(entry_id) => Some(entry_id),
            Err(e) => {
                warn!(
                    stream = %stream,
                    message_id = %record.message_id(),
                    error = %e,
                    "Failed to publish routed record"
                );
                None
            }
        }
    }

    /// Partition `records` by route and publish each partition as one batch
    ///
    /// A failed partition counts as zero published for its stream; the other
    /// partitions are unaffected. An empty input is an invalid argument.
    pub async fn publish_many(&self, records: &[JobRecord]) -> QueueResult<RouteSummary> {
        if records.is_empty() {
            return Err(QueueError::invalid_argument("records must not be empty"));
        }

        let mut partitions: BTreeMap<&str, Vec<JobRecord>> = BTreeMap::new();
        let mut summary = RouteSummary::default();

        for record in records {
            match self.route_for(record) {
                Some(stream) => partitions.entry(stream).or_default().push(record.clone()),
                None => {
                    self.drop_unroutable(record);
                    summary.unroutable += 1;
                }
            }
        }

        if summary.unroutable > 0 {
            metrics::record_unroutable(summary.unroutable);
        }

        for (stream, batch) in partitions {
            let Some(sink) = self.sinks.get(stream) else {
                continue;
            };

            let published = match sink.publish_batch(&batch).await {
                Ok(ids) => ids.len(),
                Err(e) => {
                    warn!(
                        stream = %stream,
                        count = batch.len(),
                        error = %e,
                        "Failed to publish routed batch"
                    );
                    0
                }
            };
            summary.published.insert(stream.to_string(), published);
        }

        debug!(
            published = summary.total_published(),
            unroutable = summary.unroutable,
            "Routed batch"
        );

        Ok(summary)
    }

    fn sink_for(&self, record: &JobRecord) -> Option<(&str, &K)> {
        let stream = self.route_for(record)?;
        self.sinks.get(stream).map(|sink| (stream, sink))
    }

    fn drop_unroutable(&self, record: &JobRecord) {
        warn!(
            routing_key = %self.routing_key,
            message_id = %record.message_id(),
            "No route for record, dropping"
        );
    }
}

/// JSON pointers tried in order for `routing_key`
fn lookup_pointers(routing_key: &str) -> Vec<String> {
    let pointer = |path: &str| {
        path.split('.').fold(String::new(), |mut acc, segment| {
            acc.push('/');
            acc.push_str(segment);
            acc
        })
    };

    if routing_key.contains('.') {
        return vec![pointer(routing_key)];
    }

    vec![
        pointer(routing_key),
        pointer(&format!("header.{}", routing_key)),
        pointer(&format!("data.{}", routing_key)),
    ]
}
