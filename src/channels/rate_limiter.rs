//! Hand-rolled token bucket for a per-(alert, channel) send gate. HTTP-layer
//! rate-limiting middleware is shaped around requests, not this unit of
//! work, so the bucket is implemented directly: never hold the mutex across
//! the sleep.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    inner: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            rate_per_sec,
            burst: burst as f64,
            inner: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Blocks the caller until a token is available, without holding the
    /// lock while sleeping.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    bucket.tokens = 0.0;
                    Some(Duration::from_secs_f64(deficit / self.rate_per_sec))
                }
            };

            match wait {
                None => return,
                Some(delay) => sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_consumed_without_delay() {
        let bucket = TokenBucket::new(5.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exhausted_bucket_imposes_a_wait() {
        let bucket = TokenBucket::new(5.0, 1);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        // At 5/s, the next token needs ~200ms.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
