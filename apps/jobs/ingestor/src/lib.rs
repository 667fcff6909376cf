//! Job Ingestor
//!
//! Reads discovered links as JSON lines (`{"link": ..., "source": ...}`) from a
//! file or stdin and runs one ingestion cycle over them: links seen within the
//! duplicate-filter window are skipped, the rest are published as jobs.

mod config;

pub use config::IngestorConfig;

use clap::Parser;
use core_config::{Environment, FromEnv};
use database::redis::{RedisConfig, RedisConnection};
use eyre::{Result, WrapErr};
use job_queue::{Candidate, DuplicateFilter, IngestConfig, IngestCycle, Publisher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Command line arguments
#[derive(Debug, Parser)]
#[command(version, about = "Publish jobs for newly discovered links")]
pub struct Args {
    /// File of JSON lines; reads stdin when omitted
    pub input: Option<PathBuf>,
}

/// Run one ingestion cycle
///
/// # Errors
///
/// Returns an error if configuration is invalid, the input cannot be read,
/// Redis stays unreachable, or the duplicate filter lookup fails.
pub async fn run(args: Args) -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting job ingestor"
    );

    let config = IngestorConfig::from_env().wrap_err("Failed to load ingestor configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    let candidates = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .wrap_err_with(|| format!("Failed to open {}", path.display()))?;
            read_candidates(BufReader::new(file)).await?
        }
        None => read_candidates(BufReader::new(tokio::io::stdin())).await?,
    };
    info!(count = candidates.len(), "Candidates loaded");

    let connection = Arc::new(RedisConnection::new(redis_config));
    connection
        .connect()
        .await
        .wrap_err("Failed to connect to Redis")?;

    let filter =
        DuplicateFilter::new(connection.clone(), config.dedup_set.clone()).with_ttl_secs(config.dedup_ttl_secs);
    let publisher = Publisher::new(connection, config.stream.clone()).with_max_length(config.max_len);

    let cycle = IngestCycle::new(filter, publisher).with_config(
        IngestConfig::default()
            .with_batch_size(config.batch_size)
            .with_job_kind(config.job_kind.clone()),
    );

    let report = cycle
        .run(candidates)
        .await
        .wrap_err("Ingestion cycle failed")?;

    if report.failed > 0 {
        warn!(failed = report.failed, "Some jobs were not published and will be retried next run");
    }

    Ok(())
}

/// Parse one candidate per non-blank line, skipping lines that do not parse
pub async fn read_candidates<R>(reader: R) -> Result<Vec<Candidate>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut candidates = Vec::new();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await.wrap_err("Failed to read input")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Candidate>(line) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => warn!(line = line_number, error = %e, "Skipping malformed candidate"),
        }
    }

    Ok(candidates)
}
