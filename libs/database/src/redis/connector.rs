use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use super::RedisConfig;
use crate::common::{DatabaseError, DatabaseResult, RetryPolicy, retry_with_policy};

/// Open a single Redis connection and verify it with `PING`
///
/// The returned `ConnectionManager` reconnects on its own after the first
/// successful connection; use [`RedisConnection`] to get bounded retries
/// around the initial connect. Commands time out with the client's default
/// response timeout.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    connect_with_config(url, ConnectionManagerConfig::new()).await
}

/// Like [`connect`], with explicit manager settings
pub async fn connect_with_config(
    url: &str,
    config: ConnectionManagerConfig,
) -> redis::RedisResult<ConnectionManager> {
    info!(url = %url, "Attempting to connect to Redis");

    let client = Client::open(url)?;
    let manager = ConnectionManager::new_with_config(client, config).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Successfully connected to Redis");
    Ok(manager)
}

/// Settings for the connection that carries `BLOCK` reads
///
/// A blocking `XREADGROUP` holds its reply for up to the requested wait (or
/// forever with `BLOCK 0`), so the response timeout is disabled.
fn blocking_manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new().set_response_timeout(None)
}

/// Lazily created, process-wide broker handles
///
/// One instance is built by the composition root and shared (usually as
/// `Arc<RedisConnection>`) with every publisher, consumer and filter. The
/// first call to [`handle`](Self::handle) establishes the connection under the
/// retry policy; concurrent first callers wait on the same initialisation and
/// all receive clones of a single `ConnectionManager`.
///
/// Blocking reads go through [`blocking_handle`](Self::blocking_handle), a
/// second connection without a response timeout. Redis serves one connection
/// strictly in order, so a pending `BLOCK` would otherwise hold up publishes
/// and health checks sharing the socket.
///
/// There is no explicit close: both connections are shut when the last clone
/// of the owning `RedisConnection` and of its handles is dropped.
///
/// # Example
/// ```ignore
/// use database::redis::{RedisConfig, RedisConnection};
///
/// let connection = Arc::new(RedisConnection::new(RedisConfig::from_env()?));
/// connection.connect().await?; // fail fast at startup
/// let publisher = Publisher::new(connection.clone(), "jobs:out");
/// ```
pub struct RedisConnection {
    config: RedisConfig,
    policy: RetryPolicy,
    handle: OnceCell<ConnectionManager>,
    blocking: OnceCell<ConnectionManager>,
}

impl RedisConnection {
    /// Create an unconnected manager using the config's retry policy
    pub fn new(config: RedisConfig) -> Self {
        let policy = config.retry_policy();
        Self::with_policy(config, policy)
    }

    /// Create an unconnected manager with an explicit retry policy
    pub fn with_policy(config: RedisConfig, policy: RetryPolicy) -> Self {
        Self {
            config,
            policy,
            handle: OnceCell::new(),
            blocking: OnceCell::new(),
        }
    }

    /// Establish the connection if it does not exist yet. No-op when connected.
    pub async fn connect(&self) -> DatabaseResult<()> {
        self.handle().await.map(|_| ())
    }

    /// Get a ready-to-use handle, connecting on first use
    ///
    /// Returns [`DatabaseError::ConnectionFailed`] once every attempt allowed
    /// by the retry policy has failed. Callers are expected to treat that as
    /// fatal.
    pub async fn handle(&self) -> DatabaseResult<ConnectionManager> {
        let manager = self
            .handle
            .get_or_try_init(|| self.establish(ConnectionManagerConfig::new()))
            .await?;
        Ok(manager.clone())
    }

    /// Handle reserved for blocking reads, connecting on first use
    ///
    /// Same retry and failure behaviour as [`handle`](Self::handle).
    pub async fn blocking_handle(&self) -> DatabaseResult<ConnectionManager> {
        let manager = self
            .blocking
            .get_or_try_init(|| self.establish(blocking_manager_config()))
            .await?;
        Ok(manager.clone())
    }

    /// Whether the shared handle has been established
    pub fn is_connected(&self) -> bool {
        self.handle.initialized()
    }

    /// Liveness check; never fails, returns `false` when not connected or unreachable
    pub async fn ping(&self) -> bool {
        let Some(manager) = self.handle.get() else {
            return false;
        };

        let mut conn = manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(reply) => reply == "PONG",
            Err(e) => {
                debug!(error = %e, "Redis ping failed");
                false
            }
        }
    }

    /// The configuration this manager connects with
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn establish(&self, manager_config: ConnectionManagerConfig) -> DatabaseResult<ConnectionManager> {
        let url = self.config.url.clone();
        let attempts = self.policy.attempts();

        retry_with_policy(&self.policy, || connect_with_config(&url, manager_config.clone()))
            .await
            .map_err(|e| {
                error!(
                    url = %self.config.url,
                    attempts,
                    error = %e,
                    "FATAL: could not connect to Redis"
                );
                DatabaseError::ConnectionFailed {
                    attempts,
                    reason: e.to_string(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RedisConfig {
        // Port 1 is reserved and refuses connections on loopback
        RedisConfig::new("redis://127.0.0.1:1")
    }

    #[tokio::test]
    async fn test_ping_without_handle_is_false() {
        let connection = RedisConnection::new(unreachable_config());
        assert!(!connection.is_connected());
        assert!(!connection.ping().await);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_policy() {
        let connection =
            RedisConnection::with_policy(unreachable_config(), RetryPolicy::fixed(2, 10));

        let err = connection.handle().await.unwrap_err();
        match err {
            DatabaseError::ConnectionFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_url_is_fatal() {
        let connection = RedisConnection::with_policy(
            RedisConfig::new("not-a-redis-url"),
            RetryPolicy::fixed(1, 0),
        );

        assert!(connection.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_blocking_handle_is_separate_and_bounded() {
        let connection =
            RedisConnection::with_policy(unreachable_config(), RetryPolicy::fixed(1, 0));

        let err = connection.blocking_handle().await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionFailed { attempts: 1, .. }));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    #[ignore] // Requires actual Redis
    async fn test_concurrent_first_use_shares_one_handle() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let connection = std::sync::Arc::new(RedisConnection::new(RedisConfig::new(url)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let connection = connection.clone();
                tokio::spawn(async move { connection.handle().await.is_ok() })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert!(connection.is_connected());
        assert!(connection.ping().await);
    }
}
