//! Redis connection management and health checks

mod config;
mod connector;
mod health;

pub use config::{ConnectBackoff, RedisConfig};
pub use connector::{RedisConnection, connect, connect_with_config};
pub use health::{HealthStatus, check_health, check_health_detailed};

// Re-export redis types for convenience
pub use redis::aio::{ConnectionManager, ConnectionManagerConfig};
pub use redis::{AsyncCommands, RedisError, RedisResult};
