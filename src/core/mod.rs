//! GCRA rate limiter on top of a [`GcraStore`](crate::store::GcraStore)
//!
//! - [`rate`]: emission interval calculation
//! - [`rate_limiter`]: the limiter, which reads and commits its state through
//!   the store and retries when another instance commits first

pub mod rate;
pub mod rate_limiter;

pub use rate::Rate;
pub use rate_limiter::{RateLimitResult, RateLimiter};

use crate::error::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("negative quantity: {0}")]
    NegativeQuantity(i64),

    #[error("invalid rate limit parameters")]
    InvalidRateLimit,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}
