//! Shared test utilities for queue testing
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestKeys`: deterministic, per-test stream and key names (always available)
//!
//! # Usage
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::{TestKeys, TestRedis};
//!
//! #[tokio::test]
//! async fn my_stream_test() {
//!     let redis = TestRedis::new().await;
//!     let keys = TestKeys::from_test_name("my_stream_test");
//!
//!     let stream = keys.stream("input");
//!     assert_eq!(redis.stream_length(&stream).await, 0);
//! }
//! ```

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for per-test key names
///
/// Names derived from the test name keep tests that share one container from
/// stepping on each other's streams.
pub struct TestKeys {
    seed: u64,
}

impl TestKeys {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestKeys;
    ///
    /// let keys = TestKeys::from_test_name("test_publish_many");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Stream name unique to this test
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestKeys;
    ///
    /// let keys = TestKeys::new(7);
    /// assert_eq!(keys.stream("jobs"), "test:7:stream:jobs");
    /// ```
    pub fn stream(&self, suffix: &str) -> String {
        self.key("stream", suffix)
    }

    /// Consumer group name unique to this test
    pub fn group(&self, suffix: &str) -> String {
        self.key("group", suffix)
    }

    /// Set name unique to this test
    pub fn set(&self, suffix: &str) -> String {
        self.key("set", suffix)
    }

    fn key(&self, kind: &str, suffix: &str) -> String {
        format!("test:{}:{}:{}", self.seed, kind, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_deterministic() {
        let keys1 = TestKeys::from_test_name("my_test");
        let keys2 = TestKeys::from_test_name("my_test");

        assert_eq!(keys1.stream("in"), keys2.stream("in"));
        assert_eq!(keys1.group("g"), keys2.group("g"));
    }

    #[test]
    fn test_keys_different_names() {
        let keys1 = TestKeys::from_test_name("test1");
        let keys2 = TestKeys::from_test_name("test2");

        // Different test names should generate different keys
        assert_ne!(keys1.stream("in"), keys2.stream("in"));
    }

    #[test]
    fn test_key_kinds_do_not_collide() {
        let keys = TestKeys::new(1);
        assert_ne!(keys.stream("x"), keys.set("x"));
        assert_eq!(keys.set("seen"), "test:1:set:seen");
    }
}
