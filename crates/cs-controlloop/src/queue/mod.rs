//! Deduplicating, delaying, rate-limited work queue

mod rate_limiter;
mod work_queue;

pub use rate_limiter::{ExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter};
pub use work_queue::WorkQueue;
