//! Common utilities shared across the broker plumbing

pub mod error;
pub mod retry;

pub use error::{DatabaseError, DatabaseResult};
pub use retry::{Backoff, RetryPolicy, retry, retry_with_policy};
