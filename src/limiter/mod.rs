/// Sliding-window rate limiting keyed by client identifier
pub mod rate_limiter;

pub use rate_limiter::RateLimiter;
