use tracing::debug;

use super::RedisConnection;
use crate::common::{DatabaseError, DatabaseResult};

/// Check Redis health
///
/// Executes a `PING` over the shared handle, connecting first if needed.
/// Useful for readiness checks.
pub async fn check_health(connection: &RedisConnection) -> DatabaseResult<()> {
    debug!("Running Redis health check");

    let mut conn = connection.handle().await?;
    let response: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| DatabaseError::HealthCheckFailed(format!("Redis health check failed: {}", e)))?;

    if response != "PONG" {
        return Err(DatabaseError::HealthCheckFailed(format!(
            "Redis PING returned unexpected response: {}",
            response
        )));
    }

    debug!("Redis health check passed");
    Ok(())
}

/// Health check result for detailed status reporting
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: u64,
}

impl HealthStatus {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            message: None,
            response_time_ms,
        }
    }

    pub fn unhealthy(message: String, response_time_ms: u64) -> Self {
        Self {
            healthy: false,
            message: Some(message),
            response_time_ms,
        }
    }
}

/// Check Redis health and report how long the check took
pub async fn check_health_detailed(connection: &RedisConnection) -> HealthStatus {
    let start = std::time::Instant::now();
    let result = check_health(connection).await;
    let elapsed = start.elapsed().as_millis() as u64;

    match result {
        Ok(_) => HealthStatus::healthy(elapsed),
        Err(e) => HealthStatus::unhealthy(e.to_string(), elapsed),
    }
}
