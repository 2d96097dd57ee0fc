//! Shared request pacing across fetch workers

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Fixed-interval rate limiter shared by every fetch worker in a run.
///
/// Workers call [`RateLimiter::acquire`] before each outgoing request; the
/// call returns once at least `min_interval` has elapsed since the
/// previous grant. Grants are serialized through one async mutex, so
/// adding workers raises throughput only up to the shared ceiling.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_grant: Mutex::new(None),
        }
    }

    /// Wait for the next request slot.
    pub async fn acquire(&self) {
        let mut next = self.next_grant.lock().await;
        let now = Instant::now();

        let grant_at = match *next {
            Some(at) if at > now => at,
            _ => now,
        };

        *next = Some(grant_at + self.min_interval);
        drop(next);

        if grant_at > now {
            sleep_until(grant_at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(20));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // Third grant must land at least two intervals after the first.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_shared_ceiling_across_tasks() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(15)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
            }));
        }
        for handle in handles {
            handle.await.expect("worker panicked");
        }

        // Four grants through one limiter: three full intervals minimum.
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
