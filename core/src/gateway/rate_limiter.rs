//! Token bucket rate limiting for calls crossing the broker boundary.
//!
//! The Gateway keeps two independent buckets (spec §4.1: "separate
//! allowances for order-placement calls and read calls, since a burst of
//! position polling must never starve order placement"), both built on the
//! same primitive defined here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub burst_capacity: u64,
    pub refill_rate: f64,
    pub refill_interval: Duration,
}

impl RateLimiterConfig {
    /// Default order-placement bucket: brokers typically cap order
    /// placement well below market-data polling.
    pub fn order_placement() -> Self {
        Self {
            burst_capacity: 10,
            refill_rate: 10.0,
            refill_interval: Duration::from_secs(1),
        }
    }

    /// Default read bucket (positions, margins, order book polling).
    pub fn reads() -> Self {
        Self {
            burst_capacity: 30,
            refill_rate: 30.0,
            refill_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    tokens: Arc<AtomicU64>,
    last_refill: Arc<Mutex<Instant>>,
    total_requests: Arc<AtomicU64>,
    total_allowed: Arc<AtomicU64>,
    total_rejected: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let initial_tokens = config.burst_capacity * 1000;
        Self {
            config,
            tokens: Arc::new(AtomicU64::new(initial_tokens)),
            last_refill: Arc::new(Mutex::new(Instant::now())),
            total_requests: Arc::new(AtomicU64::new(0)),
            total_allowed: Arc::new(AtomicU64::new(0)),
            total_rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_n(1)
    }

    pub fn allow_n(&self, n: u64) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.refill();

        let needed = n * 1000;
        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            if current < needed {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                if self.total_rejected.load(Ordering::Relaxed) % 100 == 1 {
                    warn!(
                        allowed = self.total_allowed.load(Ordering::Relaxed),
                        requests = self.total_requests.load(Ordering::Relaxed),
                        "gateway rate limit exceeded"
                    );
                }
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - needed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.total_allowed.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn refill(&self) {
        let mut last_refill = self.last_refill.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(*last_refill);
        if elapsed < self.config.refill_interval {
            return;
        }

        let intervals = elapsed.as_secs_f64() / self.config.refill_interval.as_secs_f64();
        let tokens_to_add = (self.config.refill_rate * intervals * 1000.0) as u64;
        if tokens_to_add > 0 {
            let max_tokens = self.config.burst_capacity * 1000;
            let current = self.tokens.load(Ordering::Acquire);
            let new_tokens = (current + tokens_to_add).min(max_tokens);
            self.tokens.store(new_tokens, Ordering::Release);
            *last_refill = now;
            debug!(added = tokens_to_add / 1000, now = new_tokens / 1000, "rate limiter refilled");
        }
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens.load(Ordering::Acquire) / 1000
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_burst_capacity() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            burst_capacity: 5,
            refill_rate: 5.0,
            refill_interval: Duration::from_secs(1),
        });
        for _ in 0..5 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());
        assert_eq!(limiter.total_rejected(), 1);
    }

    #[test]
    fn refills_after_interval() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            burst_capacity: 2,
            refill_rate: 2.0,
            refill_interval: Duration::from_millis(20),
        });
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.allow());
    }

    #[test]
    fn order_and_read_buckets_are_independent() {
        let orders = RateLimiter::new(RateLimiterConfig::order_placement());
        let reads = RateLimiter::new(RateLimiterConfig::reads());
        for _ in 0..orders.available_tokens() {
            assert!(orders.allow());
        }
        assert!(!orders.allow());
        assert!(reads.allow());
    }
}
