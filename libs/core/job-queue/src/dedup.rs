//! Rolling-TTL duplicate filter
//!
//! A named Redis set remembers keys that were already processed. Every add
//! also resets the expiry of the whole set, so memory stays bounded while
//! keys written within one window of each other are kept together.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_queue::DuplicateFilter;
//!
//! let filter = DuplicateFilter::new(connection, "ingestor");
//! let fresh = filter.has_many(&links).await?;
//! // ... publish `fresh` ...
//! filter.add_many(&fresh).await?;
//! ```

use async_trait::async_trait;
use database::redis::RedisConnection;
use std::sync::Arc;
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::traits::SeenFilter;

/// One week
pub const DEFAULT_TTL_SECS: u64 = 604_800;

/// Membership set with a single rolling expiry
#[derive(Clone)]
pub struct DuplicateFilter {
    connection: Arc<RedisConnection>,
    set_name: String,
    ttl_secs: u64,
}

impl DuplicateFilter {
    pub fn new(connection: Arc<RedisConnection>, set_name: impl Into<String>) -> Self {
        Self {
            connection,
            set_name: set_name.into(),
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    /// Set the rolling window applied on every add
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs.max(1);
        self
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Whether `key` is in the set
    pub async fn has_one(&self, key: &str) -> QueueResult<bool> {
        validate_key(key)?;

        let mut conn = self.connection.handle().await?;
        let present: bool = redis::cmd("SISMEMBER")
            .arg(&self.set_name)
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(present)
    }

    /// Keys from `keys` absent from the set, in input order
    ///
    /// One round trip regardless of the number of keys. An empty list is an
    /// invalid argument.
    pub async fn has_many<S: AsRef<str>>(&self, keys: &[S]) -> QueueResult<Vec<String>> {
        validate_keys(keys)?;

        let mut conn = self.connection.handle().await?;
        let mut cmd = redis::cmd("SMISMEMBER");
        cmd.arg(&self.set_name);
        for key in keys {
            cmd.arg(key.as_ref());
        }
        let present: Vec<bool> = cmd.query_async(&mut conn).await?;

        let missing: Vec<String> = keys
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(key, _)| key.as_ref().to_string())
            .collect();

        debug!(
            set = %self.set_name,
            checked = keys.len(),
            new = missing.len(),
            "Checked keys against duplicate filter"
        );
        metrics::record_dedup_new(&self.set_name, missing.len());

        Ok(missing)
    }

    /// Add `key` and reset the set's expiry in one transaction
    pub async fn add_one(&self, key: &str) -> QueueResult<()> {
        self.add_many(&[key]).await
    }

    /// Add every key and reset the set's expiry in one transaction
    ///
    /// Either both the adds and the expiry are applied or nothing is. An empty
    /// list is an invalid argument.
    pub async fn add_many<S: AsRef<str>>(&self, keys: &[S]) -> QueueResult<()> {
        validate_keys(keys)?;

        let mut conn = self.connection.handle().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();

        let sadd = pipe.cmd("SADD").arg(&self.set_name);
        for key in keys {
            sadd.arg(key.as_ref());
        }
        sadd.ignore();

        pipe.cmd("EXPIRE")
            .arg(&self.set_name)
            .arg(self.ttl_secs)
            .ignore();

        let _: () = pipe.query_async(&mut conn).await?;

        debug!(
            set = %self.set_name,
            count = keys.len(),
            ttl_secs = self.ttl_secs,
            "Added keys to duplicate filter"
        );

        Ok(())
    }
}

#[async_trait]
impl SeenFilter for DuplicateFilter {
    async fn unseen(&self, keys: &[String]) -> QueueResult<Vec<String>> {
        self.has_many(keys).await
    }

    async fn mark_seen(&self, keys: &[String]) -> QueueResult<()> {
        self.add_many(keys).await
    }
}

fn validate_key(key: &str) -> QueueResult<()> {
    if key.is_empty() {
        return Err(QueueError::invalid_argument("key must not be empty"));
    }
    Ok(())
}

fn validate_keys<S: AsRef<str>>(keys: &[S]) -> QueueResult<()> {
    if keys.is_empty() {
        return Err(QueueError::invalid_argument("keys must not be empty"));
    }
    keys.iter().try_for_each(|key| validate_key(key.as_ref()))
}
