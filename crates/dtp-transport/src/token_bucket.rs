//! Refill-on-read token bucket rate limiter.

use std::sync::Mutex;

use crate::clock;

/// Construction parameters for a [`TokenBucket`].
#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Maximum tokens the bucket can hold.
    pub burst: f64,
    /// Starting token count. Defaults to `burst` when unset.
    pub initial: Option<f64>,
}

impl TokenBucketConfig {
    pub fn new(rate: f64, burst: f64) -> Self {
        TokenBucketConfig {
            rate,
            burst,
            initial: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokenBucketStats {
    pub total_consumed: u64,
    pub total_rejected: u64,
}

struct Inner {
    tokens: f64,
    last_update_ms: i64,
    stats: TokenBucketStats,
}

/// Rate limiter with burst capacity, refilled lazily on every access.
///
/// All mutation happens under a single mutex; there is no background refill
/// task — `Δt` since the last touch is computed at each call.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    inner: Mutex<Inner>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        let initial = config.initial.unwrap_or(config.burst);
        TokenBucket {
            rate: config.rate,
            burst: config.burst,
            inner: Mutex::new(Inner {
                tokens: initial,
                last_update_ms: clock::now_ms(),
                stats: TokenBucketStats::default(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    fn refill_locked(&self, inner: &mut Inner) {
        let now = clock::now_ms();
        let elapsed_ms = (now - inner.last_update_ms).max(0) as f64;
        let new_tokens = (elapsed_ms / 1000.0) * self.rate;
        inner.tokens = (inner.tokens + new_tokens).min(self.burst);
        inner.last_update_ms = now;
    }

    /// Refill then atomically check-and-decrement `n` tokens.
    pub fn consume(&self, n: f64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.refill_locked(&mut inner);
        if inner.tokens >= n {
            inner.tokens -= n;
            inner.stats.total_consumed += 1;
            true
        } else {
            inner.stats.total_rejected += 1;
            false
        }
    }

    /// Poll for `n` tokens, sleeping in steps of at most 10 ms, until success
    /// or `max_wait_ms` has elapsed.
    pub fn try_consume_or_wait(&self, n: f64, max_wait_ms: u64) -> bool {
        let deadline = clock::now_ms() + max_wait_ms as i64;
        loop {
            if self.consume(n) {
                return true;
            }
            let remaining = deadline - clock::now_ms();
            if remaining <= 0 {
                return false;
            }
            let step_ms = remaining.min(10).max(0) as u64;
            std::thread::sleep(std::time::Duration::from_millis(step_ms));
        }
    }

    pub fn available(&self) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        self.refill_locked(&mut inner);
        inner.tokens
    }

    pub fn stats(&self) -> TokenBucketStats {
        self.inner.lock().unwrap().stats
    }

    /// Refill to full and clear lifetime counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens = self.burst;
        inner.last_update_ms = clock::now_ms();
        inner.stats = TokenBucketStats::default();
    }
}
