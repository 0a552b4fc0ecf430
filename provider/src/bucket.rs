use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A shared token bucket guarding outbound calls to the catalog provider.
///
/// Refills continuously at `refill_per_second` tokens per second up to
/// `burst` tokens. Every caller, regardless of how many concurrent tasks
/// hold a reference, draws from the same bucket, so the aggregate call
/// rate across the whole process never exceeds the configured rate.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    refill_per_second: f64,
    burst: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(refill_per_second: f64, burst: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            refill_per_second,
            burst,
        }
    }

    /// Suspends until a single token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill(self.refill_per_second, self.burst);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_second))
                }
            };

            match wait {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Non-blocking admission check: consumes a token and returns `true`
    /// if one was available, or returns `false` immediately without
    /// waiting. Used where an over-limit caller should be rejected rather
    /// than suspended.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        state.refill(self.refill_per_second, self.burst);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl BucketState {
    fn refill(&mut self, refill_per_second: f64, burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_second).min(burst);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn admits_burst_immediately_then_throttles() {
        let bucket = Arc::new(TokenBucket::new(5.0, 5.0));

        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        // The initial burst is free.
        assert!(start.elapsed() < Duration::from_millis(50));

        // The 6th call must wait for a refill.
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_rejects_once_burst_is_exhausted() {
        let bucket = TokenBucket::new(5.0, 5.0);
        for _ in 0..5 {
            assert!(bucket.try_acquire().await);
        }
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn ten_calls_at_5_per_second_take_at_least_a_second() {
        let bucket = Arc::new(TokenBucket::new(5.0, 5.0));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move { bucket.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
