//! Rate limiters consulted before a peer sends a message
pub mod token_bucket;

pub use token_bucket::TokenBucket;

/// Shared capacity that peers draw from before sending.
///
/// `consume` must be atomic: it either grants and debits `size` units, or
/// denies with no side effect.
pub trait RateLimiter: Send + Sync {
    fn consume(&self, size: usize) -> bool;
}

/// Grants every request
#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn consume(&self, _size: usize) -> bool {
        true
    }
}
