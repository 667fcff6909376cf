//! Job Ingestor - Entry Point
//!
//! Publishes one job per newly discovered link.

use clap::Parser;
use job_ingestor::Args;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    job_ingestor::run(Args::parse()).await
}
