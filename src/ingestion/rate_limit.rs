//! Per-host token-bucket rate limiting for connector fetches, plus the
//! flat minimum-inter-fetch pacing every connector additionally enforces.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_second: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Returns how long to wait before a token is available, `None` if one
    /// is available right now (and consumes it).
    fn try_acquire(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_second))
        }
    }
}

/// A token bucket per host. Hosts are registered lazily on first use with
/// a default rate; callers that know a host's configured
/// `requests_per_minute` should call `register` up front.
pub struct HostRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    default_requests_per_minute: u32,
}

impl HostRateLimiter {
    pub fn new(default_requests_per_minute: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            default_requests_per_minute,
        }
    }

    pub fn register(&self, host: &str, requests_per_minute: u32) {
        self.buckets
            .lock()
            .insert(host.to_string(), Bucket::new(requests_per_minute));
    }

    /// Blocks (async-sleeps) until a token for `host` is available.
    pub async fn acquire(&self, host: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets
                    .entry(host.to_string())
                    .or_insert_with(|| Bucket::new(self.default_requests_per_minute));
                bucket.try_acquire()
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_never_blocks_within_capacity() {
        let limiter = HostRateLimiter::new(60);
        for _ in 0..5 {
            limiter.acquire("boe.es").await;
        }
    }

    #[test]
    fn bucket_refills_over_time() {
        let mut bucket = Bucket::new(60);
        bucket.tokens = 0.0;
        bucket.last_refill = Instant::now() - Duration::from_secs(1);
        assert!(bucket.try_acquire().is_none());
    }
}
