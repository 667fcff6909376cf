//! Redis test infrastructure
//!
//! Provides a `TestRedis` helper that creates a Redis container for testing.

use redis::Client;
use redis::aio::MultiplexedConnection;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Test Redis wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestRedis;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let url = redis.connection_string();
/// // Hand `url` to the code under test
/// # }
/// ```
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    connection: MultiplexedConnection,
    pub connection_string: String,
}

impl TestRedis {
    /// Create a new test Redis instance
    ///
    /// Uses Redis 8 Alpine image by default.
    pub async fn new() -> Self {
        // Use Redis 8 Alpine (latest stable, lightweight)
        let redis_image = Redis::default().with_tag("8-alpine");

        let container = redis_image
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);

        let client = Client::open(connection_string.clone())
            .expect("Failed to create Redis client");

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, "Test Redis ready (Redis 8-alpine)");

        Self {
            container,
            connection,
            connection_string,
        }
    }

    /// Get a cloned connection for direct assertions
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// Get the connection string for the code under test
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Number of entries in `stream` (0 when missing)
    pub async fn stream_length(&self, stream: &str) -> u64 {
        let mut conn = self.connection();
        redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .expect("XLEN failed")
    }

    /// Number of entries delivered to `group` on `stream` but not acknowledged
    pub async fn pending_count(&self, stream: &str, group: &str) -> u64 {
        let mut conn = self.connection();
        let (count, _, _, _): (u64, Option<String>, Option<String>, Option<Vec<(String, u64)>>) =
            redis::cmd("XPENDING")
                .arg(stream)
                .arg(group)
                .query_async(&mut conn)
                .await
                .expect("XPENDING failed");
        count
    }

    /// Values of `field` for every entry of `stream`, oldest first
    pub async fn stream_values(&self, stream: &str, field: &str) -> Vec<String> {
        let mut conn = self.connection();
        let entries: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
            .arg(stream)
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await
            .expect("XRANGE failed");

        entries
            .into_iter()
            .filter_map(|(_, fields)| {
                fields
                    .into_iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, value)| value)
            })
            .collect()
    }

    /// Append a raw entry, bypassing any encoding
    pub async fn add_raw(&self, stream: &str, field: &str, value: &str) -> String {
        let mut conn = self.connection();
        redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await
            .expect("XADD failed")
    }
}

// Container is automatically cleaned up when TestRedis is dropped
impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}
