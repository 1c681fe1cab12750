//! Token bucket rate limiting keyed by `(method, caller)`.
//!
//! The bucket map is a concurrent map (`dashmap`); each bucket owns its own
//! lock, so acquiring a token for one caller never contends with another.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::policy::RateLimit;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-bucket state, refilled lazily on acquire rather than by a background
/// task, so an idle bucket costs nothing.
struct BucketState {
    inner: Mutex<Bucket>,
}

impl BucketState {
    fn new(burst: u32) -> Self {
        Self {
            inner: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn try_acquire(&self, limit: RateLimit) -> bool {
        let mut b = self.inner.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(b.last_refill).as_secs_f64();
        let refill_rate = limit.burst as f64 / limit.duration.as_secs_f64().max(f64::MIN_POSITIVE);
        b.tokens = (b.tokens + elapsed * refill_rate).min(limit.burst as f64);
        b.last_refill = now;

        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Caller identity used to key a rate limit bucket: the authenticated user,
/// or the peer address when the call is unauthenticated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallerKey {
    User(u64),
    Addr(String),
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<(&'static str, CallerKey), BucketState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a token was acquired, `false` if the caller should
    /// receive ResourceExhausted.
    pub fn try_acquire(&self, method: &'static str, caller: CallerKey, limit: RateLimit) -> bool {
        let key = (method, caller);
        if let Some(state) = self.buckets.get(&key) {
            return state.try_acquire(limit);
        }
        self.buckets
            .entry(key)
            .or_insert_with(|| BucketState::new(limit.burst))
            .try_acquire(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_exhausted_then_replenish() {
        let rl = RateLimiter::new();
        let limit = RateLimit {
            duration: Duration::from_millis(50),
            burst: 3,
        };
        let caller = CallerKey::User(1);

        for _ in 0..3 {
            assert!(rl.try_acquire("m", caller.clone(), limit));
        }
        assert!(!rl.try_acquire("m", caller.clone(), limit));

        std::thread::sleep(Duration::from_millis(60));
        assert!(rl.try_acquire("m", caller, limit));
    }

    #[test]
    fn distinct_callers_have_independent_buckets() {
        let rl = RateLimiter::new();
        let limit = RateLimit {
            duration: Duration::from_secs(60),
            burst: 1,
        };
        assert!(rl.try_acquire("m", CallerKey::User(1), limit));
        assert!(rl.try_acquire("m", CallerKey::User(2), limit));
        assert!(!rl.try_acquire("m", CallerKey::User(1), limit));
    }
}
