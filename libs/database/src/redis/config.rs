#[cfg(feature = "config")]
use core_config::{ConfigError, FromEnv, env_parse_or};

use crate::common::RetryPolicy;

/// How the connection manager spaces out connection attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectBackoff {
    Fixed,
    Exponential,
}

impl std::str::FromStr for ConnectBackoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff '{}', expected fixed or exponential", other)),
        }
    }
}

/// Redis broker configuration
///
/// # Example
///
/// ```ignore
/// use database::redis::RedisConfig;
///
/// let config = RedisConfig::new("redis://127.0.0.1:6379").with_connect_attempts(10);
/// let policy = config.retry_policy();
/// ```
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis connection URL (required)
    pub url: String,

    /// Attempts made before connection establishment is declared fatal
    pub connect_attempts: u32,

    /// Fixed delay, or exponential base delay, between connection attempts
    pub connect_delay_ms: u64,

    /// Delay strategy between connection attempts
    pub connect_backoff: ConnectBackoff,
}

impl RedisConfig {
    /// Create a new RedisConfig with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn with_connect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.connect_delay_ms = delay_ms;
        self
    }

    pub fn with_connect_backoff(mut self, backoff: ConnectBackoff) -> Self {
        self.connect_backoff = backoff;
        self
    }

    /// Get a reference to the Redis URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Retry policy used while establishing the connection
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.connect_backoff {
            ConnectBackoff::Fixed => RetryPolicy::fixed(self.connect_attempts, self.connect_delay_ms),
            ConnectBackoff::Exponential => {
                RetryPolicy::exponential(self.connect_attempts, self.connect_delay_ms)
                    .with_max_delay(10_000)
                    .with_jitter(self.connect_delay_ms / 2)
            }
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_attempts: 5,
            connect_delay_ms: 500,
            connect_backoff: ConnectBackoff::Exponential,
        }
    }
}

/// Load RedisConfig from environment variables
///
/// Environment variables:
/// - `REDIS_URL` or `REDIS_HOST` (required) - Redis connection string
/// - `REDIS_CONNECT_ATTEMPTS` (optional, default 5)
/// - `REDIS_CONNECT_DELAY_MS` (optional, default 500)
/// - `REDIS_CONNECT_BACKOFF` (optional, `fixed` or `exponential`, default exponential)
#[cfg(feature = "config")]
impl FromEnv for RedisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("REDIS_HOST"))
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;

        let defaults = Self::default();

        Ok(Self {
            url,
            connect_attempts: env_parse_or("REDIS_CONNECT_ATTEMPTS", defaults.connect_attempts)?,
            connect_delay_ms: env_parse_or("REDIS_CONNECT_DELAY_MS", defaults.connect_delay_ms)?,
            connect_backoff: env_parse_or("REDIS_CONNECT_BACKOFF", defaults.connect_backoff)?,
        })
    }
}
