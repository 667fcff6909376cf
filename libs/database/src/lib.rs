//! Broker plumbing shared by the job queue services
//!
//! Provides a lazily-initialised, retried Redis connection handle plus the
//! generic retry/backoff utility used to establish it.
//!
//! # Features
//!
//! - `redis` (default) - Redis connection manager and health checks
//! - `config` - `core_config::FromEnv` support for [`redis::RedisConfig`]
//! - `all` - All features
//!
//! # Example
//!
//! ```ignore
//! use database::redis::{RedisConfig, RedisConnection};
//!
//! let connection = RedisConnection::new(RedisConfig::new("redis://127.0.0.1:6379"));
//! let mut conn = connection.handle().await?;
//! let _: () = redis::cmd("PING").query_async(&mut conn).await?;
//! ```

pub mod common;

#[cfg(feature = "redis")]
pub mod redis;

pub use common::{DatabaseError, DatabaseResult};
