//! Per-source-IP token buckets for the federation surface.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

/// Sustained rate per source, requests per second.
const RATE_PER_SEC: f64 = 1.0;
/// Bucket capacity.
const BURST: f64 = 5.0;
/// Stale buckets are dropped once the table grows past this.
const MAX_TRACKED: usize = 4096;

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token-bucket limiter keyed by source IP. Localhost is exempt.
pub struct RateLimiter {
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { buckets: Mutex::new(HashMap::new()) }
    }

    /// Check and consume one token for `ip`.
    pub fn allow(&self, ip: IpAddr) -> bool {
        if ip.is_loopback() {
            return true;
        }
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap();

        if buckets.len() > MAX_TRACKED {
            buckets.retain(|_, b| now.duration_since(b.last).as_secs() < 60);
        }

        let bucket = buckets.entry(ip).or_insert(Bucket { tokens: BURST, last: now });
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * RATE_PER_SEC).min(BURST);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
