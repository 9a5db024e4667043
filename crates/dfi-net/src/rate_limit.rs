use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dfi_shared::Address;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{NetError, Result};

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next whole token is available.
    fn time_to_token(&self, rate: f64) -> Duration {
        if rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(((1.0 - self.tokens) / rate).max(0.0))
    }
}

/// Token buckets keyed by peer address.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<Address, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, peer: &Address) -> bool {
        self.try_take(peer).await.is_ok()
    }

    /// Take one token, or the wait until one is due.
    async fn try_take(&self, peer: &Address) -> std::result::Result<(), Duration> {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(peer.clone())
            .or_insert_with(|| TokenBucket::new(self.capacity));
        if bucket.try_consume(self.rate, self.capacity) {
            Ok(())
        } else {
            Err(bucket.time_to_token(self.rate))
        }
    }

    /// Wait for a token, giving up once `timeout` would be exceeded.
    pub async fn acquire(&self, peer: &Address, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = match self.try_take(peer).await {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let now = Instant::now();
            if wait == Duration::MAX || now + wait > deadline {
                warn!(peer = %peer, "Rate limit exceeded");
                return Err(NetError::RateLimited);
            }
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

/// The two limiters every inbound session is metered by.
#[derive(Clone)]
pub struct PeerLimiters {
    pub query: RateLimiter,
    pub announce: RateLimiter,
}

impl PeerLimiters {
    pub fn new(query: RateLimiter, announce: RateLimiter) -> Self {
        Self { query, announce }
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        self.query.purge_stale(max_idle_secs).await;
        self.announce.purge_stale(max_idle_secs).await;
    }
}
