//! Retry policy for completion calls.
//!
//! Backoff is `base * 2^(attempt - 1)` capped at `max_delay`, with a larger
//! base for rate-limit failures. Sleeping is behind [`Sleeper`] so the policy
//! can be exercised without real delays.

use std::time::Duration;

use async_trait::async_trait;

/// Retryable failure classes. Timeouts are classed as rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub rate_limit_base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on a single call.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            rate_limit_base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, class: FailureClass) -> Duration {
        let base = match class {
            FailureClass::RateLimited => self.rate_limit_base_delay,
            FailureClass::Transient => self.base_delay,
        };
        let exponent = attempt.saturating_sub(1).min(31);
        base.checked_mul(2u32.pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            rate_limit_base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn transient_backoff_doubles() {
        let p = policy();
        assert_eq!(p.delay_for(1, FailureClass::Transient), Duration::from_millis(100));
        assert_eq!(p.delay_for(2, FailureClass::Transient), Duration::from_millis(200));
        assert_eq!(p.delay_for(3, FailureClass::Transient), Duration::from_millis(400));
    }

    #[test]
    fn rate_limit_base_is_larger() {
        let p = policy();
        assert!(
            p.delay_for(1, FailureClass::RateLimited) > p.delay_for(1, FailureClass::Transient)
        );
        assert_eq!(p.delay_for(2, FailureClass::RateLimited), Duration::from_secs(2));
    }

    #[test]
    fn delay_is_capped() {
        let p = policy();
        assert_eq!(p.delay_for(10, FailureClass::RateLimited), Duration::from_secs(5));
        assert_eq!(p.delay_for(u32::MAX, FailureClass::Transient), Duration::from_secs(5));
    }

    #[test]
    fn retry_bounded_by_max_attempts() {
        let p = policy();
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));
        let single = RetryPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert!(!single.should_retry(1));
    }
}
