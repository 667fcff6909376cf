//! Health check handlers for queue workers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness checks (`/health`, `/healthz`)
//! - Readiness checks (`/ready`, `/readyz`)
//! - Stream monitoring (`/streams/info`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use database::redis::{
    AsyncCommands, ConnectionManager, HealthStatus, RedisConnection, RedisResult, check_health_detailed,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{QueueResult, is_no_group};
use crate::metrics;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Broker connection for readiness checks.
    pub connection: Arc<RedisConnection>,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Streams reported by `/streams/info`.
    pub streams: Vec<String>,
    /// Consumer group whose pending count is reported, if any.
    pub group_name: Option<String>,
}

impl HealthState {
    /// Create a new health state.
    pub fn new(
        connection: Arc<RedisConnection>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        streams: Vec<String>,
    ) -> Self {
        Self {
            connection,
            app_name: app_name.into(),
            app_version: app_version.into(),
            streams,
            group_name: None,
        }
    }

    /// Also report pending entries for `group_name`.
    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }
}

/// Health response for liveness checks.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Per-stream monitoring data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamStats {
    pub stream: String,
    pub length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<u64>,
}

/// Liveness check handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness check handler.
///
/// Checks that the broker answers `PING` and reports how long it took.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let response = readiness_response(check_health_detailed(&state.connection).await);
    if response.0 == StatusCode::OK {
        Ok(response)
    } else {
        Err(response)
    }
}

fn readiness_response(status: HealthStatus) -> (StatusCode, Json<Value>) {
    if status.healthy {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": {
                    "redis": "ok"
                },
                "response_time_ms": status.response_time_ms
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": {
                    "redis": format!("error: {}", status.message.unwrap_or_default())
                },
                "response_time_ms": status.response_time_ms
            })),
        )
    }
}

/// Stream info handler for monitoring.
///
/// Returns the length of every configured stream and, when a group is
/// configured, how many entries it has pending there.
pub async fn streams_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match collect_stream_stats(&state).await {
        Ok(stats) => Ok(Json(json!({
            "group": state.group_name,
            "streams": stats,
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("Failed to get stream info: {}", e)
            })),
        )),
    }
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

async fn collect_stream_stats(state: &HealthState) -> QueueResult<Vec<StreamStats>> {
    let mut conn = state.connection.handle().await?;
    let mut stats = Vec::with_capacity(state.streams.len());

    for stream in &state.streams {
        // XLEN of a missing stream is 0
        let length: u64 = conn.xlen(stream).await?;

        let pending = match &state.group_name {
            Some(group) => Some(pending_count(&mut conn, stream, group).await?),
            None => None,
        };

        stats.push(StreamStats {
            stream: stream.clone(),
            length,
            pending,
        });
    }

    Ok(stats)
}

/// Pending entries of `group` on `stream`; 0 while the group does not exist yet
async fn pending_count(conn: &mut ConnectionManager, stream: &str, group: &str) -> QueueResult<u64> {
    let summary: RedisResult<(u64, Option<String>, Option<String>, Option<Vec<(String, u64)>>)> =
        redis::cmd("XPENDING").arg(stream).arg(group).query_async(conn).await;

    match summary {
        Ok((count, _, _, _)) => Ok(count),
        Err(e) if is_no_group(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Create a router with the health, readiness, stream info and metrics endpoints.
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/streams/info", get(streams_info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
