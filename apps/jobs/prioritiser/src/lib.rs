//! Job Prioritiser Service
//!
//! Consumes jobs from several input streams, reorders each fetched batch by
//! job priority and republishes it to a single output stream.
//!
//! ## Architecture
//!
//! ```text
//! Redis Streams (INPUT_STREAMS)
//!   ↓ (Consumer Group: GROUP_NAME)
//! ConsumerCombiner
//!   ↓ (batch of BATCH_SIZE, stable sort by PRIORITY_MAP)
//! PriorityScheduler
//!   ↓
//! Redis Stream (OUTPUT_STREAM)
//! ```
//!
//! ## Features
//!
//! - Consumer group support for horizontal scaling
//! - At-least-once delivery: acknowledge only after republishing
//! - Optional reclaim of records abandoned by crashed instances
//! - Graceful shutdown handling
//! - Health check endpoint for Kubernetes liveness and readiness checks

mod config;

pub use config::PrioritiserConfig;

use axum::Router;
use core_config::{Environment, FromEnv};
use database::redis::{RedisConfig, RedisConnection};
use eyre::{Result, WrapErr};
use job_queue::{
    ConsumerCombiner, HealthState, PriorityScheduler, Publisher, SchedulerConfig, health_router,
    metrics,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness checks: `/health`, `/healthz`
/// - Readiness checks: `/ready`, `/readyz`
/// - Stream monitoring: `/streams/info`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the prioritiser
///
/// This is the main entry point for the service. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Connects to Redis, giving up after the configured attempts
/// 3. Ensures the consumer group exists on every input stream
/// 4. Runs the scheduler until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is missing or invalid
/// - Redis stays unreachable after every connection attempt
/// - The scheduler hits an unrecoverable error
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics().wrap_err("Failed to initialize metrics")?;

    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    info!(name = %app_name, version = %app_version, environment = ?environment, "Starting job prioritiser");

    let config = PrioritiserConfig::from_env().wrap_err("Failed to load prioritiser configuration")?;
    info!(
        input_streams = ?config.input_streams,
        output_stream = %config.output_stream,
        group = %config.group_name,
        consumer = %config.consumer_name,
        batch_size = config.batch_size,
        block_ms = config.block_ms,
        reclaim_idle_ms = ?config.reclaim_idle_ms,
        "Prioritiser configuration loaded"
    );

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let connection = Arc::new(RedisConnection::new(redis_config));
    connection
        .connect()
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let combiner = ConsumerCombiner::new(
        connection.clone(),
        config.input_streams.clone(),
        config.group_name.clone(),
    )?
    .with_consumer_name(config.consumer_name.clone())?
    .with_block_ms(config.block_ms);

    let publisher = Publisher::new(connection.clone(), config.output_stream.clone())
        .with_max_length(config.output_max_len);

    let scheduler = PriorityScheduler::new(combiner, publisher)
        .with_priorities(config.priorities.clone())
        .with_config(
            SchedulerConfig::default()
                .with_batch_size(config.batch_size)
                .with_reclaim_idle_ms(config.reclaim_idle_ms),
        );

    // Set up a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let mut monitored = config.input_streams.clone();
    monitored.push(config.output_stream.clone());
    let health_state = HealthState::new(connection.clone(), app_name, app_version, monitored)
        .with_group(config.group_name.clone());

    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    scheduler
        .run(shutdown_rx)
        .await
        .wrap_err("Priority scheduler failed")?;

    info!("Job prioritiser stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    Ok(())
}
