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

/// Command frames allowed per tick of simulation rate (covers resends after loss)
pub const COMMAND_BURST_FACTOR: u32 = 2;

/// Control messages (start, action-completed, leave) per second
pub const CONTROL_RATE_LIMIT: u32 = 10;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    command_limiter: Arc<Limiter>,
    control_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            command_limiter: create_limiter(tick_rate.saturating_mul(COMMAND_BURST_FACTOR)),
            control_limiter: create_limiter(CONTROL_RATE_LIMIT),
        }
    }

    /// Check if a command frame is allowed (returns true if allowed)
    pub fn check_command(&self) -> bool {
        self.command_limiter.check().is_ok()
    }

    /// Check if a control message is allowed
    pub fn check_control(&self) -> bool {
        self.control_limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_limiter_rejects_past_quota() {
        let limiter = ConnectionRateLimiter::new(60);
        let allowed = (0..CONTROL_RATE_LIMIT * 3)
            .filter(|_| limiter.check_control())
            .count();
        assert!(allowed >= 1);
        assert!(allowed < (CONTROL_RATE_LIMIT * 3) as usize);
    }
}
