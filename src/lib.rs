//! # ThrottleCrab Redis
//!
//! Shared GCRA rate limiter state in Redis.
//!
//! Several limiter instances, on one host or many, keep the theoretical
//! arrival time of each key in a Redis-compatible server and update it with
//! compare-and-swap, so they enforce one limit together without any
//! coordinator besides the server.
//!
//! ## Quick Start
//!
//! ```no_run
//! use throttlecrab_redis::{ConnectionPool, PoolConfig, RateLimiter, RedisStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ConnectionPool::open("redis://127.0.0.1:6379", PoolConfig::default())?;
//! let store = RedisStore::builder().key_prefix("ratelimit:").build(pool);
//! let limiter = RateLimiter::new(store);
//!
//! // 10 burst, 100 requests per 60 seconds
//! let (allowed, result) = limiter.rate_limit("user:123", 10, 100, 60, 1).await?;
//! if allowed {
//!     println!("Request allowed! Remaining: {}", result.remaining);
//! } else {
//!     println!("Rate limited! Retry after: {:?}", result.retry_after);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Store
//!
//! [`RedisStore`] implements [`GcraStore`]:
//!
//! - reads return the server's `TIME` along with the value, so limiter
//!   decisions never depend on local clocks
//! - compare-and-swap is a Lua script when `EVAL` is available, and falls back
//!   to `WATCH`/`MULTI`/`EXEC` for good once the server rejects `EVAL`
//! - TTLs are applied with whole-second precision
//!
//! Declined creates and swaps are `Ok(false)`. [`RateLimiter`] re-reads and
//! retries them; other callers of the store decide for themselves.

pub mod core;
pub mod error;
pub mod pool;
pub mod store;

pub use crate::core::{CellError, Rate, RateLimitResult, RateLimiter};
pub use error::{Result, StoreError};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use store::{
    CAS_SCRIPT, GcraStore, MISSING_VALUE, RedisStore, RedisStoreBuilder, is_unknown_command,
};
