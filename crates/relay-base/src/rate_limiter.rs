//! Token bucket in front of the upstream attestation API.
//!
//! The upstream enforces a hard ceiling of roughly 35 requests per second
//! and answers sustained overshoot with a multi-minute lockout, so every
//! upstream call in the process must pass through one shared bucket.
//! Refill is lazy: tokens accrue on demand from the elapsed time, with no
//! timer task.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Default burst capacity and refill rate, a safety margin under the
/// observed upstream ceiling.
pub const DEFAULT_RATE: u32 = 30;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Process-wide token bucket. `acquire` is safe under concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_second: f64,
}

impl RateLimiter {
    /// A bucket holding at most `capacity` tokens, refilled at
    /// `refill_per_second`.
    pub fn new(capacity: u32, refill_per_second: u32) -> Self {
        RateLimiter {
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_second: refill_per_second as f64,
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().expect("rate limiter poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens =
                    (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                (1.0 - bucket.tokens) / self.refill_per_second
            };
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new(DEFAULT_RATE, DEFAULT_RATE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_drains_immediately() {
        let limiter = RateLimiter::new(3, 10);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(1, 10);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        // one token at 10/s takes 100ms to accrue
        assert!(start.elapsed() >= Duration::from_millis(99));
        assert!(start.elapsed() <= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn window_law_bounds_acquisitions() {
        // over a window T, acquisitions are bounded by B + R*T
        let limiter = RateLimiter::new(3, 10);
        let start = Instant::now();
        let window = Duration::from_millis(500);
        let mut acquired = 0u32;
        while start.elapsed() < window {
            limiter.acquire().await;
            acquired += 1;
        }
        assert!(acquired <= 3 + 5 + 1, "acquired {acquired}");
        assert!(acquired >= 7, "acquired {acquired}");
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_capacity() {
        let limiter = RateLimiter::new(2, 10);
        tokio::time::sleep(Duration::from_secs(60)).await;
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        // third token must wait despite the long idle stretch
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(99));
    }
}
