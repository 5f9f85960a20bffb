//! Redis-backed state store for the GCRA rate limiter
//!
//! [`RedisStore`] keeps one integer per key (the theoretical arrival time of
//! the limiter) with a TTL, and offers the three operations the limiter needs:
//!
//! - [`get_with_time`](GcraStore::get_with_time): read the value together with
//!   the backend clock, so all limiter instances agree on "now"
//! - [`set_if_not_exists`](GcraStore::set_if_not_exists): create the first value
//! - [`compare_and_swap`](GcraStore::compare_and_swap): commit an update only if
//!   nobody else committed first
//!
//! Compare-and-swap runs a Lua script when the backend supports `EVAL`. The
//! first time a backend rejects `EVAL` as an unknown command the store switches
//! to `WATCH`/`MULTI`/`EXEC` for the rest of its lifetime.

mod scripted;
mod watch;


use async_trait::async_trait;
use redis::RedisError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::pool::{ConnectionPool, PooledConnection};

pub use scripted::CAS_SCRIPT;

/// Value reported by [`GcraStore::get_with_time`] for an absent key
pub const MISSING_VALUE: i64 = -1;

/// Storage operations the GCRA rate limiter relies on
///
/// A declined create or swap is `Ok(false)`, never an error: losing a race
/// against another limiter instance is an expected outcome. Callers decide
/// whether to re-read and retry.
#[async_trait]
pub trait GcraStore: Send + Sync {
    /// Get the value of `key` (or [`MISSING_VALUE`]) and the store's current time
    async fn get_with_time(&self, key: &str) -> Result<(i64, SystemTime)>;

    /// Set `key` to `value` only if it does not exist, returning whether it was set
    ///
    /// A `ttl` of at least one second is (re)applied to the key afterwards.
    async fn set_if_not_exists(&self, key: &str, value: i64, ttl: Duration) -> Result<bool>;

    /// Atomically replace `old` with `new`, returning whether the swap happened
    ///
    /// A missing key or a value other than `old` gives `Ok(false)`.
    async fn compare_and_swap(&self, key: &str, old: i64, new: i64, ttl: Duration)
    -> Result<bool>;
}

/// The two interchangeable compare-and-swap implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CasPath {
    /// Single `EVAL`, atomic on the server
    Scripted,
    /// `WATCH` + `GET`, then `MULTI`/`EXEC`
    Watch,
}

/// Redis implementation of [`GcraStore`]
///
/// Cheap to clone; clones share the pool and the scripting capability flag.
///
/// # Example
///
/// ```no_run
/// use throttlecrab_redis::{ConnectionPool, GcraStore, PoolConfig, RedisStore};
/// use std::time::Duration;
///
/// # async fn run() -> throttlecrab_redis::Result<()> {
/// let pool = ConnectionPool::open("redis://127.0.0.1:6379", PoolConfig::default())?;
/// let store = RedisStore::builder().key_prefix("rl:").db(2).build(pool);
///
/// let (tat, now) = store.get_with_time("user:42").await?;
/// store.set_if_not_exists("user:42", 1, Duration::from_secs(60)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStore {
    pool: ConnectionPool,
    prefix: String,
    db: u32,
    supports_eval: Arc<AtomicBool>,
}

/// Builder for configuring a RedisStore
pub struct RedisStoreBuilder {
    prefix: String,
    db: u32,
}

impl RedisStoreBuilder {
    /// Prefix prepended to every key (empty by default)
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Logical database index (0 by default)
    pub fn db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    /// Create the store on top of `pool`
    pub fn build(self, pool: ConnectionPool) -> RedisStore {
        RedisStore::new(pool, self.prefix, self.db)
    }
}

impl RedisStore {
    /// Create a store with scripting assumed available until the backend says otherwise
    pub fn new(pool: ConnectionPool, prefix: impl Into<String>, db: u32) -> Self {
        RedisStore {
            pool,
            prefix: prefix.into(),
            db,
            supports_eval: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start a builder with no key prefix and database 0
    pub fn builder() -> RedisStoreBuilder {
        RedisStoreBuilder {
            prefix: String::new(),
            db: 0,
        }
    }

    /// Whether compare-and-swap still uses the scripted path
    pub fn supports_scripting(&self) -> bool {
        self.supports_eval.load(Ordering::Relaxed)
    }

    /// Prefix prepended to every key
    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }

    /// Logical database index the store selects
    pub fn db(&self) -> u32 {
        self.db
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Check out a connection and select the configured database
    async fn acquire(&self) -> Result<PooledConnection<'_>> {
        let mut conn = self.pool.checkout().await?;

        conn.select(self.db)
            .await
            .map_err(|source| StoreError::Select {
                db: self.db,
                source,
            })?;

        Ok(conn)
    }

    fn current_path(&self) -> CasPath {
        if self.supports_eval.load(Ordering::Relaxed) {
            CasPath::Scripted
        } else {
            CasPath::Watch
        }
    }

    async fn run_path(
        path: CasPath,
        conn: &mut PooledConnection<'_>,
        key: &str,
        old: i64,
        new: i64,
        ttl_secs: u64,
    ) -> redis::RedisResult<bool> {
        let result = match path {
            CasPath::Scripted => scripted::compare_and_swap(&mut **conn, key, old, new, ttl_secs)
                .await
                .map(|outcome| outcome.swapped()),
            CasPath::Watch => watch::compare_and_swap(&mut **conn, key, old, new, ttl_secs).await,
        };
        if let Err(err) = &result {
            conn.note_error(err);
        }
        result
    }
}

#[async_trait]
impl GcraStore for RedisStore {
    async fn get_with_time(&self, key: &str) -> Result<(i64, SystemTime)> {
        let key = self.full_key(key);
        let mut conn = self.acquire().await?;

        let reply: redis::RedisResult<((i64, i64), Option<i64>)> = redis::pipe()
            .cmd("TIME")
            .cmd("GET")
            .arg(&key)
            .query_async(&mut *conn)
            .await;
        let ((secs, micros), value) = reply.inspect_err(|err| conn.note_error(err))?;

        let now = time_from_reply(secs, micros)?;
        Ok((value.unwrap_or(MISSING_VALUE), now))
    }

    async fn set_if_not_exists(&self, key: &str, value: i64, ttl: Duration) -> Result<bool> {
        let key = self.full_key(key);
        let mut conn = self.acquire().await?;

        let created: redis::RedisResult<bool> = redis::cmd("SETNX")
            .arg(&key)
            .arg(value)
            .query_async(&mut *conn)
            .await;
        let created = created.inspect_err(|err| conn.note_error(err))?;

        let ttl_secs = ttl_seconds(ttl);
        if ttl_secs > 0 {
            let expired: redis::RedisResult<()> = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(ttl_secs)
                .query_async(&mut *conn)
                .await;
            if let Err(source) = expired {
                conn.note_error(&source);
                return Err(StoreError::Expire { created, source });
            }
        }

        debug!(key = %key, created, "set if not exists");
        Ok(created)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        old: i64,
        new: i64,
        ttl: Duration,
    ) -> Result<bool> {
        let key = self.full_key(key);
        let ttl_secs = ttl_seconds(ttl);
        let mut conn = self.acquire().await?;

        let mut path = self.current_path();
        if path == CasPath::Scripted {
            match Self::run_path(path, &mut conn, &key, old, new, ttl_secs).await {
                Ok(swapped) => {
                    debug!(key = %key, swapped, "compare and swap (eval)");
                    return Ok(swapped);
                }
                Err(err) if is_unknown_command(&err) => {
                    warn!(
                        "Backend does not support EVAL ({}), falling back to WATCH for compare-and-swap",
                        err
                    );
                    self.supports_eval.store(false, Ordering::Relaxed);
                    path = CasPath::Watch;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let swapped = Self::run_path(path, &mut conn, &key, old, new, ttl_secs).await?;
        debug!(key = %key, swapped, "compare and swap (watch)");
        Ok(swapped)
    }
}

/// Whether `err` means the backend does not know the command it was sent
///
/// Redis has no dedicated error code for this, so the reply text is matched.
/// Redis, and most proxies that strip commands, answer with
/// `ERR unknown command '<name>'`. This is the only place the text is looked
/// at; swap it for a structured check if the client ever exposes one.
pub fn is_unknown_command(err: &RedisError) -> bool {
    err.to_string().contains("unknown command")
}

/// TTLs are sent with whole-second precision, rounded down
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs()
}

fn time_from_reply(secs: i64, micros: i64) -> Result<SystemTime> {
    if secs < 0 || !(0..1_000_000).contains(&micros) {
        return Err(StoreError::InvalidReply(format!(
            "TIME returned {secs} seconds and {micros} microseconds"
        )));
    }
    Ok(UNIX_EPOCH + Duration::from_secs(secs as u64) + Duration::from_micros(micros as u64))
}
