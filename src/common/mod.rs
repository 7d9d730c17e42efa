//! Shared utilities for outbound HTTP clients

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};
