//! Rate limiting logic and shared state management.

mod bucket;
mod limiter;
mod state;

pub use bucket::{RateLimit, TokenBucket};
pub use limiter::DistributedRateLimiter;
pub use state::LimiterState;
