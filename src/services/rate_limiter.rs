use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};

/// Paces outbound provider requests: a concurrency cap plus a minimum
/// delay between request starts, shared by every adapter in the chain.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<Instant>>,
    min_delay: Duration,
}

impl RateLimiter {
    /// `max_concurrent` in-flight requests, `requests_per_minute` sustained.
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let min_delay_ms = 60_000 / requests_per_minute.max(1) as u64;
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            last_request: Arc::new(Mutex::new(Instant::now() - Duration::from_secs(60))),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// Blocks until a permit is free and the pacing delay has elapsed.
    /// The returned guard releases the permit on drop.
    pub async fn acquire(&self) -> RateLimitGuard {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed");

        let wait_time = {
            let last = self.last_request.lock();
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                Some(self.min_delay - elapsed)
            } else {
                None
            }
        };

        if let Some(delay) = wait_time {
            sleep(delay).await;
        }

        *self.last_request.lock() = Instant::now();

        RateLimitGuard { _permit: permit }
    }
}

pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enforces_minimum_delay() {
        let limiter = RateLimiter::new(2, 60); // 1 req/sec

        let start = std::time::Instant::now();
        let guard1 = limiter.acquire().await;
        drop(guard1);
        let _guard2 = limiter.acquire().await;
        assert!(start.elapsed().as_millis() >= 900, "second acquire should be paced");
    }
}
