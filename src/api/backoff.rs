use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryPolicy;

/// Exponential backoff with jitter for transient fetch failures.
#[derive(Debug)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_ms: u64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(base_ms: u64, max_ms: u64, retries: u32) -> Self {
        Self {
            base_ms,
            max_ms,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Retries = attempts minus the initial try.
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(
            policy.backoff_base_ms,
            policy.backoff_max_ms,
            policy.max_attempts.saturating_sub(1),
        )
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let capped = std::cmp::min(
            self.base_ms
                .saturating_mul(2_u64.saturating_pow(self.current_attempt)),
            self.max_ms,
        );

        // Jitter between 50% and 100% of the capped delay spreads
        // concurrent workers retrying against the same endpoint.
        let delay = rand::thread_rng().gen_range(capped / 2..=capped.max(1));

        log::warn!(
            "retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay
        );

        sleep(Duration::from_millis(delay)).await;
        self.current_attempt += 1;
        Ok(())
    }

    /// Retries consumed so far.
    pub fn attempts_made(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backoff_exhausts_after_retries() {
        let mut backoff = ExponentialBackoff::new(1, 2, 2);

        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_err());
        assert_eq!(backoff.attempts_made(), 2);
    }

    #[tokio::test]
    async fn test_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(1, 2, 1);

        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_err());

        backoff.reset();
        assert!(backoff.sleep().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_retries_fails_immediately() {
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
        };
        let mut backoff = ExponentialBackoff::from_policy(&policy);
        assert!(backoff.sleep().await.is_err());
    }
}
