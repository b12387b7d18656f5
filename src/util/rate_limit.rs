//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max target clicks per second per connection
pub const CLICK_RATE_LIMIT: u32 = 30;

/// Per-connection click limiter
#[derive(Clone)]
pub struct ClickRateLimiter {
    click_limiter: Arc<Limiter>,
}

impl ClickRateLimiter {
    pub fn new() -> Self {
        Self::with_rate(CLICK_RATE_LIMIT)
    }

    pub fn with_rate(clicks_per_second: u32) -> Self {
        Self {
            click_limiter: create_limiter(clicks_per_second),
        }
    }

    /// Check if a click is allowed (returns true if allowed)
    pub fn check_click(&self) -> bool {
        self.click_limiter.check().is_ok()
    }
}

impl Default for ClickRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_beyond_quota_is_limited() {
        let limiter = ClickRateLimiter::with_rate(3);
        let allowed = (0..10).filter(|_| limiter.check_click()).count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn test_zero_rate_still_allows_one() {
        let limiter = ClickRateLimiter::with_rate(0);
        assert!(limiter.check_click());
    }
}
