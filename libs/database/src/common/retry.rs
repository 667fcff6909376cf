use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay strategy applied between failed attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },

    /// `base_ms * growth^(attempt - 1)`, capped at `max_delay_ms`,
    /// plus a uniform random jitter in `[0, jitter_ms]`
    Exponential {
        base_ms: u64,
        growth: f64,
        max_delay_ms: u64,
        jitter_ms: u64,
    },
}

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay strategy between attempts
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Constant delay between attempts
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay_ms },
        }
    }

    /// Exponential delay doubling from `base_ms`, capped at 30s, without jitter
    pub fn exponential(max_attempts: u32, base_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base_ms,
                growth: 2.0,
                max_delay_ms: 30_000,
                jitter_ms: 0,
            },
        }
    }

    /// Set the growth factor (exponential backoff only)
    pub fn with_growth(mut self, factor: f64) -> Self {
        if let Backoff::Exponential { growth, .. } = &mut self.backoff {
            *growth = factor.max(1.0);
        }
        self
    }

    /// Set the delay cap (exponential backoff only)
    pub fn with_max_delay(mut self, delay_ms: u64) -> Self {
        if let Backoff::Exponential { max_delay_ms, .. } = &mut self.backoff {
            *max_delay_ms = delay_ms;
        }
        self
    }

    /// Set the upper bound of the uniform jitter (exponential backoff only)
    pub fn with_jitter(mut self, jitter: u64) -> Self {
        if let Backoff::Exponential { jitter_ms, .. } = &mut self.backoff {
            *jitter_ms = jitter;
        }
        self
    }

    /// Effective attempt budget; zero is treated as a single attempt.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given 1-based attempt has failed
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential {
                base_ms,
                growth,
                max_delay_ms,
                jitter_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let raw = (*base_ms as f64) * growth.powi(exponent);
                let capped = if raw.is_finite() {
                    (raw as u64).min(*max_delay_ms)
                } else {
                    *max_delay_ms
                };
                Duration::from_millis(capped + uniform_jitter(*jitter_ms))
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, exponential from 100ms, capped at 5s, up to 50ms of jitter
    fn default() -> Self {
        Self::exponential(3, 100)
            .with_max_delay(5_000)
            .with_jitter(50)
    }
}

/// Retry an async operation according to `policy`
///
/// The operation is invoked up to `policy.max_attempts` times. When every
/// attempt fails the error of the last attempt is returned unchanged.
///
/// # Example
/// ```ignore
/// use database::common::{retry_with_policy, RetryPolicy};
///
/// let policy = RetryPolicy::fixed(5, 250);
/// let conn = retry_with_policy(&policy, || database::redis::connect(&url)).await?;
/// ```
pub async fn retry_with_policy<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %e, "Operation failed, giving up");
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    attempt,
                    max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry with the default policy
pub async fn retry<F, Fut, T, E>(operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_policy(&RetryPolicy::default(), operation).await
}

/// Random value in `[0, upper]` used to spread out retries from many processes
fn uniform_jitter(upper: u64) -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    if upper == 0 {
        return 0;
    }

    RandomState::new().hash_one(std::time::SystemTime::now()) % (upper + 1)
}
