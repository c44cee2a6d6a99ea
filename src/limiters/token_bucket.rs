//! Token bucket rate limiting algorithm
use std::sync::Mutex;

use chrono::Utc;
use tracing::trace;

use super::RateLimiter;
use crate::settings;

/// Mutable bucket contents, guarded by the limiter's lock
#[derive(Clone, Debug)]
struct BucketState {
    tokens: f64,
    last_drip: i64,
}

impl BucketState {
    /// Tokens are added at the rate of token_rate * time_since_last_drip
    fn drip(&mut self, settings: &settings::RateLimitSettings, now_ms: i64) {
        let diff_ms = now_ms - self.last_drip;
        // For this algorithm we arbitrarily do not trust intervals less than 5ms,
        // so we only *add* tokens if the diff is greater than that.
        if diff_ms < 5 {
            return;
        }
        let tokens_to_add = settings.token_rate_milliseconds() * diff_ms as f64;
        self.tokens = (self.tokens + tokens_to_add).min(settings.capacity).max(0.0);
        self.last_drip = now_ms;
    }
}

/// Byte-denominated token bucket shared by every peer of a node.
///
/// `consume` is atomic: the drip and the debit happen under one lock, and a
/// denied request leaves the token count as the drip set it.
#[derive(Debug)]
pub struct TokenBucket {
    settings: settings::RateLimitSettings,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A new bucket starts full
    pub fn new(rate_limit_settings: settings::RateLimitSettings) -> Self {
        Self::with_tokens(
            rate_limit_settings.capacity,
            rate_limit_settings,
            Utc::now().timestamp_millis(),
        )
    }

    pub fn with_tokens(
        tokens: f64,
        rate_limit_settings: settings::RateLimitSettings,
        now_ms: i64,
    ) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: tokens.min(rate_limit_settings.capacity).max(0.0),
                last_drip: now_ms,
            }),
            settings: rate_limit_settings,
        }
    }

    pub fn get_settings(&self) -> &settings::RateLimitSettings {
        &self.settings
    }

    /// Tokens currently available, without refilling
    pub fn tokens(&self) -> f64 {
        self.lock().tokens
    }

    /// Refill for the time elapsed up to `now_ms`, then debit `size` if it fits
    pub fn consume_at(&self, size: usize, now_ms: i64) -> bool {
        let mut state = self.lock();
        state.drip(&self.settings, now_ms);
        let wanted = size as f64;
        if state.tokens >= wanted {
            state.tokens -= wanted;
            trace!("Token bucket granted {} bytes, {} left", size, state.tokens);
            true
        } else {
            trace!(
                "Token bucket denied {} bytes, only {} available",
                size,
                state.tokens
            );
            false
        }
    }

    // A poisoned lock still holds a consistent bucket: every mutation is a
    // single assignment.
    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RateLimiter for TokenBucket {
    fn consume(&self, size: usize) -> bool {
        self.consume_at(size, Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn get_settings() -> settings::RateLimitSettings {
        settings::RateLimitSettings {
            rate: 1000.0,
            capacity: 500.0,
        }
    }

    #[test]
    fn new_bucket_is_full() {
        let bucket = TokenBucket::new(get_settings());
        assert_eq!(bucket.tokens(), 500.0);
    }

    #[test]
    fn consume_debits_and_denies() {
        let bucket = TokenBucket::with_tokens(300.0, get_settings(), 0);
        assert!(bucket.consume_at(200, 0));
        assert_eq!(bucket.tokens(), 100.0);
        assert!(!bucket.consume_at(101, 0));
        // denial has no side effect
        assert_eq!(bucket.tokens(), 100.0);
        assert!(bucket.consume_at(100, 0));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn drip_refills_over_time() {
        let bucket = TokenBucket::with_tokens(0.0, get_settings(), 0);
        assert!(!bucket.consume_at(100, 0));
        // 1000 bytes/s for 150ms
        assert!(bucket.consume_at(100, 150));
        assert!((bucket.tokens() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn drip_clamped_to_capacity() {
        let bucket = TokenBucket::with_tokens(0.0, get_settings(), 0);
        assert!(bucket.consume_at(0, 60_000));
        assert_eq!(bucket.tokens(), 500.0);
        assert!(!bucket.consume_at(501, 120_000));
    }

    #[test]
    fn short_intervals_do_not_refill() {
        let bucket = TokenBucket::with_tokens(10.0, get_settings(), 1_000);
        assert!(!bucket.consume_at(11, 1_004));
        assert_eq!(bucket.tokens(), 10.0);
    }

    #[test]
    fn zero_capacity_denies_everything_but_empty() {
        let bucket = TokenBucket::new(settings::RateLimitSettings {
            rate: 0.0,
            capacity: 0.0,
        });
        assert!(!bucket.consume(1));
        assert!(bucket.consume(0));
    }

    #[test]
    fn shared_across_threads() {
        let bucket = Arc::new(TokenBucket::with_tokens(
            100.0,
            settings::RateLimitSettings {
                rate: 0.0,
                capacity: 100.0,
            },
            0,
        ));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bucket = bucket.clone();
                std::thread::spawn(move || (0..50).filter(|_| bucket.consume_at(1, 0)).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 100);
        assert_eq!(bucket.tokens(), 0.0);
    }
}
