//! Bounded connection pool with an explicit lifecycle.
//!
//! The pool is constructed by the process entry point and handed to every
//! component that needs data access; there is no module-level instance.
//! Capacity, idle reaping and acquire timeouts are enforced by the sqlx
//! pool underneath. This layer adds the lifecycle state, a bound on queued
//! acquirers and borrow accounting.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::db::{DbError, DbResult};

/// Idle connections older than this are pinged before being handed out.
const STALE_CHECK_AFTER: Duration = Duration::from_secs(1);

/// Lifecycle of a [`DatabasePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PoolState {
    Uninitialized = 0,
    Connecting = 1,
    Ready = 2,
    Draining = 3,
    Closed = 4,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::Uninitialized,
            1 => PoolState::Connecting,
            2 => PoolState::Ready,
            3 => PoolState::Draining,
            _ => PoolState::Closed,
        }
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub state: PoolState,
    pub capacity: u32,
    /// Open connections, borrowed or idle
    pub size: u32,
    pub idle: usize,
    pub borrowed: usize,
    pub waiters: usize,
}

impl PoolStats {
    /// Connections that could still be borrowed without waiting for a release.
    pub fn available(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.borrowed)
    }
}

struct PoolInner {
    config: PoolConfig,
    state: AtomicU8,
    pool: OnceLock<SqlitePool>,
    borrowed: AtomicUsize,
    /// Signalled whenever a borrowed connection comes back
    returned: Notify,
    waiters: AtomicUsize,
}

/// Shared handle to the connection pool. Cloning is cheap.
#[derive(Clone)]
pub struct DatabasePool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl DatabasePool {
    /// Create an uninitialized pool. Nothing connects until [`initialize`](Self::initialize).
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                state: AtomicU8::new(PoolState::Uninitialized as u8),
                pool: OnceLock::new(),
                borrowed: AtomicUsize::new(0),
                returned: Notify::new(),
                waiters: AtomicUsize::new(0),
            }),
        }
    }

    /// Create and initialize a pool in one step.
    pub async fn connect(config: PoolConfig) -> DbResult<Self> {
        let pool = Self::new(config);
        pool.initialize().await?;
        Ok(pool)
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn set_state(&self, state: PoolState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Establish the pool and run one liveness probe.
    ///
    /// Fails with [`DbError::Connection`] when the database cannot be reached
    /// within the connect timeout or the probe query fails. A failed attempt
    /// leaves the pool uninitialized.
    pub async fn initialize(&self) -> DbResult<()> {
        match self.inner.state.compare_exchange(
            PoolState::Uninitialized as u8,
            PoolState::Connecting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) => {
                return match PoolState::from_u8(current) {
                    PoolState::Ready => Ok(()),
                    PoolState::Draining | PoolState::Closed => Err(DbError::Closed),
                    _ => Err(DbError::Connection {
                        message: "pool initialization already in progress".to_string(),
                    }),
                };
            }
        }

        match self.open().await {
            Ok(pool) => {
                // Only the caller that won the compare_exchange reaches this point.
                let _ = self.inner.pool.set(pool);
                self.set_state(PoolState::Ready);
                info!(
                    "Database pool ready (capacity {})",
                    self.inner.config.max_connections
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(PoolState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn open(&self) -> DbResult<SqlitePool> {
        let config = &self.inner.config;
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DbError::Connection {
                message: e.to_string(),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .test_before_acquire(false)
            .before_acquire(|conn, meta| {
                Box::pin(async move {
                    if meta.idle_for < STALE_CHECK_AFTER {
                        return Ok(true);
                    }
                    match conn.ping().await {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            warn!("Discarding idle connection that failed its health check: {}", e);
                            Ok(false)
                        }
                    }
                })
            })
            .connect_lazy_with(options);

        let probe = async {
            let mut conn = pool.acquire().await?;
            sqlx::query("SELECT 1").execute(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        };

        match tokio::time::timeout(config.connect_timeout, probe).await {
            Ok(Ok(())) => {
                debug!("Liveness probe succeeded");
                Ok(pool)
            }
            Ok(Err(e)) => {
                pool.close().await;
                Err(DbError::Connection {
                    message: format!("liveness probe failed: {}", e),
                })
            }
            Err(_) => {
                pool.close().await;
                Err(DbError::Connection {
                    message: format!(
                        "liveness probe timed out after {:?}",
                        config.connect_timeout
                    ),
                })
            }
        }
    }

    /// The underlying sqlx pool, or [`DbError::NotInitialized`] before startup.
    pub fn get(&self) -> DbResult<&SqlitePool> {
        match self.state() {
            PoolState::Ready => self.inner.pool.get().ok_or(DbError::NotInitialized),
            PoolState::Uninitialized | PoolState::Connecting => Err(DbError::NotInitialized),
            PoolState::Draining | PoolState::Closed => Err(DbError::Closed),
        }
    }

    /// Borrow a connection, waiting at most the connect timeout.
    ///
    /// Fails fast with [`DbError::PoolExhausted`] when more than
    /// `max_waiters` callers are already queued.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        let pool = self.get()?;

        let queued = WaiterSlot::enter(&self.inner.waiters);
        if queued.position >= self.inner.config.max_waiters {
            return Err(DbError::PoolExhausted {
                capacity: self.inner.config.max_connections,
                waiters: queued.position,
            });
        }

        let started = Instant::now();
        let conn = pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => DbError::Timeout {
                waited: started.elapsed(),
            },
            sqlx::Error::PoolClosed => DbError::Closed,
            other => DbError::Connection {
                message: other.to_string(),
            },
        })?;
        drop(queued);

        self.inner.borrowed.fetch_add(1, Ordering::AcqRel);
        debug!("Connection acquired in {:?}", started.elapsed());
        Ok(PooledConnection {
            conn: Some(conn),
            dirty: false,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let (size, idle) = match self.inner.pool.get() {
            Some(pool) => (pool.size(), pool.num_idle()),
            None => (0, 0),
        };
        PoolStats {
            state: self.state(),
            capacity: self.inner.config.max_connections,
            size,
            idle,
            borrowed: self.inner.borrowed.load(Ordering::Acquire),
            waiters: self.inner.waiters.load(Ordering::Acquire),
        }
    }

    /// Stop handing out connections and wait for borrowed ones to come back.
    pub async fn close(&self) {
        let previous = self
            .inner
            .state
            .swap(PoolState::Draining as u8, Ordering::AcqRel);
        if PoolState::from_u8(previous) == PoolState::Closed {
            self.set_state(PoolState::Closed);
            return;
        }
        if let Some(pool) = self.inner.pool.get() {
            info!("Draining database pool");
            pool.close().await;
        }
        self.wait_for_borrowed().await;
        self.set_state(PoolState::Closed);
        info!("Database pool closed");
    }

    async fn wait_for_borrowed(&self) {
        loop {
            // Registered before the check so a release in between still wakes us
            let returned = self.inner.returned.notified();
            let borrowed = self.inner.borrowed.load(Ordering::Acquire);
            if borrowed == 0 {
                return;
            }
            debug!("Waiting for {} borrowed connection(s)", borrowed);
            returned.await;
        }
    }
}

/// Counts a caller as queued for the lifetime of the slot.
struct WaiterSlot<'a> {
    counter: &'a AtomicUsize,
    position: usize,
}

impl<'a> WaiterSlot<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let position = counter.fetch_add(1, Ordering::AcqRel);
        Self { counter, position }
    }
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A borrowed connection, owned by exactly one logical operation.
///
/// The connection goes back to the pool on [`release`](Self::release) or
/// when the handle is dropped, whichever comes first, so every exit path
/// (including a cancelled future) returns it.
pub struct PooledConnection {
    conn: Option<PoolConnection<Sqlite>>,
    /// Set while the connection may hold an open transaction
    dirty: bool,
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.is_released())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl PooledConnection {
    /// Return the connection to the pool.
    ///
    /// Returns `false` (and does nothing) when already released.
    pub fn release(&mut self) -> bool {
        match self.conn.take() {
            Some(mut conn) => {
                if self.dirty {
                    debug!("Closing connection released with an unfinished transaction");
                    conn.close_on_drop();
                }
                drop(conn);
                self.inner.borrowed.fetch_sub(1, Ordering::AcqRel);
                self.inner.returned.notify_waiters();
                true
            }
            None => {
                debug!("release() called on a connection that was already released");
                false
            }
        }
    }

    /// Mark whether the connection may be left inside an open transaction.
    /// A dirty connection is closed on release instead of being reused.
    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// Mutable access to the live connection.
    pub fn connection(&mut self) -> DbResult<&mut SqliteConnection> {
        self.conn.as_deref_mut().ok_or_else(|| DbError::Connection {
            message: "connection handle already released".to_string(),
        })
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.release();
        }
    }
}
