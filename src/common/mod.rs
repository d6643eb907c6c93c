//! Common utilities shared across provider clients
//!
//! - Rate limiter using token bucket algorithm

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};
