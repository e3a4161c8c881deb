//! # Resilience Module
//!
//! Reusable failure-isolation patterns wrapped around every upstream
//! data/execution source.
//!
//! ## Components
//! - `CircuitBreaker`: blocks requests to a failing source until it cools down.
//! - `SlidingWindowLimiter`: serializes callers so a source's rate limit is
//!   never exceeded (delays, never drops).
//! - `RetryPolicy`: exponential backoff with jitter for transient failures.
//! - `PriceCache`: short-TTL cache with stale-on-failure fallback.

pub mod circuit_breaker;
pub mod price_cache;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitRegistry, CircuitState};
pub use price_cache::PriceCache;
pub use rate_limiter::SlidingWindowLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};
