//! Connection pool for the Redis backend
//!
//! Every operation of the store checks out one dedicated connection and holds
//! it for the whole operation. `WATCH` state lives on the server per
//! connection, so a connection is never shared between two operations at the
//! same time.

use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, IntoConnectionInfo, RedisError};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, StoreError};

struct IdleConnection {
    conn: MultiplexedConnection,
    db: u32,
    last_used: Instant,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_idle_connections: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_connections: 100,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct PoolInner {
    client: Client,
    /// Database a fresh connection starts in, from the URL
    initial_db: u32,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
}

/// Cloneable handle to a pool of Redis connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(client: Client, config: PoolConfig) -> Self {
        let max_idle = config.max_idle_connections;
        let initial_db = u32::try_from(client.get_connection_info().redis.db).unwrap_or(0);
        Self {
            inner: Arc::new(PoolInner {
                client,
                initial_db,
                config,
                idle: Mutex::new(VecDeque::with_capacity(max_idle)),
            }),
        }
    }

    /// Create a pool for the given URL, e.g. `redis://127.0.0.1:6379`
    ///
    /// No connection is made until the first checkout.
    pub fn open(url: impl IntoConnectionInfo, config: PoolConfig) -> Result<Self> {
        let client = Client::open(url).map_err(StoreError::Connection)?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get a connection - either from the idle queue or a new one
    ///
    /// The returned guard puts the connection back when dropped.
    pub async fn checkout(&self) -> Result<PooledConnection<'_>> {
        let reused = {
            let now = Instant::now();
            let idle_timeout = self.inner.config.idle_timeout;
            let mut idle = self.inner.idle.lock();
            idle.retain(|c| now.duration_since(c.last_used) < idle_timeout);
            idle.pop_back()
        };

        let (conn, db) = match reused {
            Some(idle) => (idle.conn, idle.db),
            None => {
                let conn = timeout(
                    self.inner.config.connect_timeout,
                    self.inner.client.get_multiplexed_async_connection(),
                )
                .await
                .map_err(|_| StoreError::Timeout)?
                .map_err(StoreError::Connection)?;
                debug!("Opened new backend connection");
                (conn, self.inner.initial_db)
            }
        };

        Ok(PooledConnection {
            pool: self,
            conn,
            db,
            reusable: true,
        })
    }

    fn checkin(&self, conn: MultiplexedConnection, db: u32) {
        let mut idle = self.inner.idle.lock();
        if idle.len() < self.inner.config.max_idle_connections {
            idle.push_back(IdleConnection {
                conn,
                db,
                last_used: Instant::now(),
            });
        }
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle_connections: self.inner.idle.lock().len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
}

/// A checked-out connection
///
/// Returned to the pool on drop unless it was discarded. The pool remembers
/// which database each connection has selected, so stores using different
/// databases can share one pool.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: MultiplexedConnection,
    db: u32,
    reusable: bool,
}

impl PooledConnection<'_> {
    /// Database this connection currently has selected
    pub fn db(&self) -> u32 {
        self.db
    }

    /// Switch to `db`, sending `SELECT` only if another database is selected
    ///
    /// On failure the connection is discarded, its database being unknown.
    pub async fn select(&mut self, db: u32) -> redis::RedisResult<()> {
        if self.db == db {
            return Ok(());
        }
        let selected: redis::RedisResult<()> =
            redis::cmd("SELECT").arg(db).query_async(&mut self.conn).await;
        match selected {
            Ok(()) => {
                self.db = db;
                Ok(())
            }
            Err(err) => {
                self.discard();
                Err(err)
            }
        }
    }

    /// Drop the connection instead of returning it to the pool
    pub fn discard(&mut self) {
        self.reusable = false;
    }

    /// Discard the connection if `err` leaves it in an unknown state
    pub fn note_error(&mut self, err: &RedisError) {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            debug!("Discarding backend connection after error: {}", err);
            self.discard();
        }
    }
}

impl Deref for PooledConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if self.reusable {
            // Handles are reference counted, the clone keeps the socket alive
            self.pool.checkin(self.conn.clone(), self.db);
        }
    }
}
