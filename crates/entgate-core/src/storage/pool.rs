//! Blocking connection pool.

use super::config::DatabaseConfig;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

/// A pooled connection that returns itself to the pool when dropped.
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in Drop.
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.pool.release(conn);
        }
    }
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

struct PoolInner {
    config: DatabaseConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        if conn.is_autocommit() {
            state.idle.push(conn);
        } else {
            // A connection left mid-transaction is discarded.
            tracing::warn!("discarding pooled connection with an open transaction");
            state.open -= 1;
        }
        drop(state);
        self.available.notify_one();
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.config.busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "foreign_keys", true)?;
        tracing::debug!(path = %self.config.path.display(), "opened connection");
        Ok(conn)
    }
}

/// A fixed-size pool of SQLite connections.
///
/// `acquire` blocks until a connection is idle, a new one may be opened, or
/// the acquire timeout elapses.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool. Connections are opened lazily.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Acquire a connection.
    pub fn acquire(&self) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.inner.config.acquire_timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(self.wrap(conn));
            }
            if state.open < self.inner.config.max_connections {
                state.open += 1;
                drop(state);
                return match self.inner.open_connection() {
                    Ok(conn) => Ok(self.wrap(conn)),
                    Err(e) => {
                        self.inner.state.lock().open -= 1;
                        self.inner.available.notify_one();
                        Err(e)
                    }
                };
            }
            if self
                .inner
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Err(Error::Pool(format!(
                    "timed out after {:?} waiting for a connection",
                    self.inner.config.acquire_timeout
                )));
            }
        }
    }

    /// Number of open connections (idle and in use).
    pub fn open_connections(&self) -> usize {
        self.inner.state.lock().open
    }

    /// Number of idle connections.
    pub fn idle_connections(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    fn wrap(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            connection: Some(conn),
            pool: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_reuses_connections() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(DatabaseConfig::new(dir.path().join("db.sqlite")));

        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        assert_eq!(pool.open_connections(), 1);
        assert_eq!(pool.idle_connections(), 1);

        let conn = pool.acquire().unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn test_acquire_times_out() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(
            DatabaseConfig::new(dir.path().join("db.sqlite"))
                .with_max_connections(1)
                .with_acquire_timeout(Duration::from_millis(20)),
        );
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, Error::Pool(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(
            DatabaseConfig::new(dir.path().join("db.sqlite"))
                .with_max_connections(1)
                .with_acquire_timeout(Duration::from_secs(5)),
        );
        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }
}
