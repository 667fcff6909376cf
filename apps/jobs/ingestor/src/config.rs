//! Ingestor settings loaded from the environment

use core_config::{ConfigError, FromEnv, env_or_default, env_parse_or};
use job_queue::{DEFAULT_INGEST_BATCH_SIZE, DEFAULT_MAX_LENGTH, DEFAULT_TTL_SECS, JobKind};

/// Ingestor configuration
///
/// Environment variables:
/// - `INGEST_STREAM` (optional, default `ingested_articles`)
/// - `INGEST_MAX_LEN` (optional, default 100)
/// - `DEDUP_SET` (optional, default `ingestor`)
/// - `DEDUP_TTL_SECS` (optional, default one week)
/// - `INGEST_BATCH_SIZE` (optional, default 100)
/// - `INGEST_JOB_TYPE` (optional, default `background`)
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub stream: String,
    pub max_len: usize,
    pub dedup_set: String,
    pub dedup_ttl_secs: u64,
    pub batch_size: usize,
    pub job_kind: JobKind,
}

impl FromEnv for IngestorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let job_type = env_or_default("INGEST_JOB_TYPE", "background");
        if job_type.trim().is_empty() {
            return Err(ConfigError::ParseError {
                key: "INGEST_JOB_TYPE".to_string(),
                details: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            stream: env_or_default("INGEST_STREAM", "ingested_articles"),
            max_len: env_parse_or("INGEST_MAX_LEN", DEFAULT_MAX_LENGTH)?,
            dedup_set: env_or_default("DEDUP_SET", "ingestor"),
            dedup_ttl_secs: env_parse_or("DEDUP_TTL_SECS", DEFAULT_TTL_SECS)?,
            batch_size: env_parse_or("INGEST_BATCH_SIZE", DEFAULT_INGEST_BATCH_SIZE)?,
            job_kind: JobKind::from(job_type.trim()),
        })
    }
}
