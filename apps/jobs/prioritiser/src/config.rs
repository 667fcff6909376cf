//! Prioritiser settings loaded from the environment

use core_config::{ConfigError, FromEnv, env_list, env_parse_opt, env_parse_or, env_required};
use job_queue::{
    DEFAULT_BATCH_SIZE, DEFAULT_BLOCK_MS, DEFAULT_MAX_LENGTH, PriorityMap, default_consumer_name,
};

/// Prioritiser configuration
///
/// Environment variables:
/// - `INPUT_STREAMS` (required) - comma separated input streams
/// - `OUTPUT_STREAM` (required) - stream receiving the reordered jobs
/// - `GROUP_NAME` (required) - consumer group shared by all prioritiser instances
/// - `CONSUMER_NAME` (optional, default `<hostname>-<pid>`)
/// - `PRIORITY_MAP` (optional, `type:rank,...`, default `user:1,admin:1,background:2,logging:3`)
/// - `BATCH_SIZE` (optional, default 10)
/// - `BLOCK_MS` (optional, default 5000, `0` waits forever)
/// - `OUTPUT_MAX_LEN` (optional, default 100)
/// - `RECLAIM_IDLE_MS` (optional, reclaiming is off when unset)
/// - `HEALTH_PORT` (optional, default 8083)
#[derive(Debug, Clone)]
pub struct PrioritiserConfig {
    pub input_streams: Vec<String>,
    pub output_stream: String,
    pub group_name: String,
    pub consumer_name: String,
    pub priorities: PriorityMap,
    pub batch_size: usize,
    pub block_ms: u64,
    pub output_max_len: usize,
    pub reclaim_idle_ms: Option<u64>,
    pub health_port: u16,
}

impl FromEnv for PrioritiserConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let priorities = match env_parse_opt::<String>("PRIORITY_MAP")? {
            Some(raw) => raw.parse().map_err(|e: job_queue::QueueError| ConfigError::ParseError {
                key: "PRIORITY_MAP".to_string(),
                details: e.to_string(),
            })?,
            None => PriorityMap::default(),
        };

        let batch_size: usize = env_parse_or("BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConfigError::ParseError {
                key: "BATCH_SIZE".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            input_streams: env_list("INPUT_STREAMS")?,
            output_stream: env_required("OUTPUT_STREAM")?,
            group_name: env_required("GROUP_NAME")?,
            consumer_name: env_parse_opt::<String>("CONSUMER_NAME")?
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(default_consumer_name),
            priorities,
            batch_size,
            block_ms: env_parse_or("BLOCK_MS", DEFAULT_BLOCK_MS)?,
            output_max_len: env_parse_or("OUTPUT_MAX_LEN", DEFAULT_MAX_LENGTH)?,
            reclaim_idle_ms: env_parse_opt("RECLAIM_IDLE_MS")?,
            health_port: env_parse_or("HEALTH_PORT", 8083)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_queue::{JobKind, Priority};

    const REQUIRED: [(&str, Option<&str>); 3] = [
        ("INPUT_STREAMS", Some("ingestor:to.be.scraped, user-jobs:to.be.scraped")),
        ("OUTPUT_STREAM", Some("jobs:prioritised")),
        ("GROUP_NAME", Some("prioritiser")),
    ];

    const OPTIONAL_UNSET: [(&str, Option<&str>); 7] = [
        ("CONSUMER_NAME", None),
        ("PRIORITY_MAP", None),
        ("BATCH_SIZE", None),
        ("BLOCK_MS", None),
        ("OUTPUT_MAX_LEN", None),
        ("RECLAIM_IDLE_MS", None),
        ("HEALTH_PORT", None),
    ];

    #[test]
    fn test_defaults() {
        let vars: Vec<_> = REQUIRED.iter().chain(OPTIONAL_UNSET.iter()).copied().collect();
        temp_env::with_vars(vars, || {
            let config = PrioritiserConfig::from_env().unwrap();

            assert_eq!(
                config.input_streams,
                vec!["ingestor:to.be.scraped", "user-jobs:to.be.scraped"]
            );
            assert_eq!(config.output_stream, "jobs:prioritised");
            assert_eq!(config.group_name, "prioritiser");
            assert_eq!(config.consumer_name, default_consumer_name());
            assert_eq!(config.priorities, PriorityMap::default());
            assert_eq!(config.batch_size, 10);
            assert_eq!(config.block_ms, 5_000);
            assert_eq!(config.output_max_len, 100);
            assert_eq!(config.reclaim_idle_ms, None);
            assert_eq!(config.health_port, 8083);
        });
    }

    #[test]
    fn test_overrides() {
        let mut vars: Vec<_> = REQUIRED.to_vec();
        vars.extend([
            ("CONSUMER_NAME", Some("prioritiser-1")),
            ("PRIORITY_MAP", Some("logging:1,user:5")),
            ("BATCH_SIZE", Some("50")),
            ("BLOCK_MS", Some("0")),
            ("OUTPUT_MAX_LEN", Some("10000")),
            ("RECLAIM_IDLE_MS", Some("60000")),
            ("HEALTH_PORT", Some("9000")),
        ]);
        temp_env::with_vars(vars, || {
            let config = PrioritiserConfig::from_env().unwrap();

            assert_eq!(config.consumer_name, "prioritiser-1");
            assert_eq!(config.priorities.rank_of(Some(&JobKind::Logging)), Priority::new(1));
            assert_eq!(config.priorities.rank_of(Some(&JobKind::Admin)), Priority::LOWEST);
            assert_eq!(config.batch_size, 50);
            assert_eq!(config.block_ms, 0);
            assert_eq!(config.output_max_len, 10_000);
            assert_eq!(config.reclaim_idle_ms, Some(60_000));
            assert_eq!(config.health_port, 9000);
        });
    }

    #[test]
    fn test_missing_required() {
        let mut vars: Vec<_> = REQUIRED.to_vec();
        vars[1] = ("OUTPUT_STREAM", None);
        temp_env::with_vars(vars, || {
            let err = PrioritiserConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("OUTPUT_STREAM"));
        });
    }

    #[test]
    fn test_invalid_values() {
        let mut vars: Vec<_> = REQUIRED.to_vec();
        vars.push(("BATCH_SIZE", Some("0")));
        temp_env::with_vars(vars, || {
            let err = PrioritiserConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("BATCH_SIZE"));
        });

        let mut vars: Vec<_> = REQUIRED.to_vec();
        vars.push(("PRIORITY_MAP", Some("user=1")));
        temp_env::with_vars(vars, || {
            let err = PrioritiserConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("PRIORITY_MAP"));
        });
    }
}
