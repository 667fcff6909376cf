//! Job Prioritiser - Entry Point
//!
//! Reorders jobs from several input streams by priority onto one output stream.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    job_prioritiser::run().await
}
