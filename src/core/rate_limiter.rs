//! GCRA (Generic Cell Rate Algorithm) rate limiter backed by a shared store

use super::{CellError, Rate};
use crate::store::{GcraStore, MISSING_VALUE};
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

/// Attempts to commit before giving up when other instances keep winning
const MAX_ATTEMPTS: u32 = 10;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// The maximum number of requests allowed in a burst
    pub limit: i64,
    /// The number of requests remaining in the current window
    pub remaining: i64,
    /// Time until the rate limit resets to full capacity
    pub reset_after: Duration,
    /// Time to wait before the next request will be allowed (0 if request was allowed)
    pub retry_after: Duration,
}

/// GCRA rate limiter whose state lives in a [`GcraStore`]
///
/// The theoretical arrival time (TAT) of each key is stored as nanoseconds
/// since the Unix epoch. "Now" is always the store's clock, so instances on
/// hosts with skewed clocks still agree.
///
/// # Example
///
/// ```no_run
/// use throttlecrab_redis::{ConnectionPool, PoolConfig, RateLimiter, RedisStore};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::open("redis://127.0.0.1:6379", PoolConfig::default())?;
/// let limiter = RateLimiter::new(RedisStore::new(pool, "rl:", 0));
///
/// // 100 requests per minute with a burst of 10
/// let (allowed, result) = limiter.rate_limit("user:123", 10, 100, 60, 1).await?;
/// if !allowed {
///     println!("Retry after {:?}", result.retry_after);
/// }
/// # Ok(())
/// # }
/// ```
pub struct RateLimiter<S: GcraStore> {
    store: S,
}

impl<S: GcraStore> RateLimiter<S> {
    pub fn new(store: S) -> Self {
        RateLimiter { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check if `quantity` requests for `key` are allowed and record them if so
    ///
    /// - `max_burst`: requests allowed at once
    /// - `count_per_period` / `period`: sustained rate, `period` in seconds
    ///
    /// Denied requests are not recorded.
    pub async fn rate_limit(
        &self,
        key: &str,
        max_burst: i64,
        count_per_period: i64,
        period: i64,
        quantity: i64,
    ) -> Result<(bool, RateLimitResult), CellError> {
        if quantity < 0 {
            return Err(CellError::NegativeQuantity(quantity));
        }

        if max_burst <= 0 {
            return Err(CellError::InvalidRateLimit);
        }

        let rate =
            Rate::from_count_and_period(count_per_period, period).ok_or(CellError::InvalidRateLimit)?;
        let emission_interval_ns = i64::try_from(rate.period().as_nanos())
            .ok()
            .filter(|ns| *ns > 0)
            .ok_or(CellError::InvalidRateLimit)?;
        let delay_variation_tolerance_ns = emission_interval_ns.saturating_mul(max_burst);
        let increment = emission_interval_ns.saturating_mul(quantity);

        for attempt in 1..=MAX_ATTEMPTS {
            let (tat_val, now) = self.store.get_with_time(key).await?;
            let now_ns = now
                .duration_since(UNIX_EPOCH)
                .ok()
                .and_then(|d| i64::try_from(d.as_nanos()).ok())
                .ok_or_else(|| CellError::Internal(format!("Store time out of range: {now:?}")))?;

            let tat = if tat_val == MISSING_VALUE {
                now_ns
            } else {
                tat_val
            };

            let new_tat = tat.max(now_ns).saturating_add(increment);
            let allow_at = new_tat.saturating_sub(delay_variation_tolerance_ns);

            if now_ns < allow_at {
                let ttl_ns = tat.saturating_sub(now_ns).max(0);
                return Ok((
                    false,
                    RateLimitResult {
                        limit: max_burst,
                        remaining: remaining(delay_variation_tolerance_ns, ttl_ns, emission_interval_ns),
                        reset_after: nanos(ttl_ns),
                        retry_after: nanos(allow_at - now_ns),
                    },
                ));
            }

            let ttl_ns = new_tat.saturating_sub(now_ns);
            let ttl = whole_seconds_ceil(ttl_ns);

            let committed = if tat_val == MISSING_VALUE {
                self.store.set_if_not_exists(key, new_tat, ttl).await?
            } else {
                self.store
                    .compare_and_swap(key, tat_val, new_tat, ttl)
                    .await?
            };

            if committed {
                return Ok((
                    true,
                    RateLimitResult {
                        limit: max_burst,
                        remaining: remaining(delay_variation_tolerance_ns, ttl_ns, emission_interval_ns),
                        reset_after: nanos(ttl_ns),
                        retry_after: Duration::ZERO,
                    },
                ));
            }

            debug!(key, attempt, "Lost commit race, retrying");
        }

        Err(CellError::Internal("Max retries exceeded".into()))
    }
}

fn remaining(delay_variation_tolerance_ns: i64, ttl_ns: i64, emission_interval_ns: i64) -> i64 {
    let room = delay_variation_tolerance_ns.saturating_sub(ttl_ns);
    if room > 0 {
        room / emission_interval_ns
    } else {
        0
    }
}

fn nanos(ns: i64) -> Duration {
    Duration::from_nanos(ns.max(0) as u64)
}

// The store drops sub-second TTLs, round up so a live key always expires
fn whole_seconds_ceil(ns: i64) -> Duration {
    Duration::from_secs((ns.max(0) as u64).div_ceil(NANOS_PER_SEC))
}
