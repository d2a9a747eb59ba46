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

/// Max inbound transport messages per second, per connection
pub const INBOUND_RATE_LIMIT: u32 = 30;

/// Max PLAYER_SHOOT frames per second, per connection. Kept well above the
/// rapid-fire threshold so abusive bursts still reach the detector.
pub const SHOT_RATE_LIMIT: u32 = 250;

/// Create a rate limiter with the specified messages per second
pub fn create_limiter(per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Per-connection inbound limiter with a separate lane for shot telemetry
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    inbound: Arc<Limiter>,
    shots: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new(per_second: u32, shots_per_second: u32) -> Self {
        Self {
            inbound: create_limiter(per_second),
            shots: create_limiter(shots_per_second),
        }
    }

    /// Returns true if another inbound message is allowed right now
    pub fn check(&self) -> bool {
        self.inbound.check().is_ok()
    }

    /// Returns true if another shot frame is allowed right now
    pub fn check_shot(&self) -> bool {
        self.shots.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new(INBOUND_RATE_LIMIT, SHOT_RATE_LIMIT)
    }
}
