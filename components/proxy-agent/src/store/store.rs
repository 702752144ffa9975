//! Store - responsibility and behavior
//!
//! The Store is the single piece of shared mutable state in the proxy agent.
//! It wraps one embedded SQLite database file behind an r2d2 connection pool
//! and exposes it to the async components through `spawn_blocking`, so that
//! SQLite work never stalls the cooperative scheduler.
//!
//! Key responsibilities:
//! - Open (or create) the database file under the configured cache directory.
//! - Apply the numbered schema migrations at startup, idempotently.
//! - Hand out pooled connections with WAL journaling and foreign keys on.
//! - Record best-effort connection health rows in `connection_log`.
//!
//! Every CacheEngine and WriteQueue state change that touches more than one
//! row runs inside a single rusqlite transaction obtained from this pool.

// Local crates
use crate::store::migrations;

// External crates
use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Database file name inside the cache directory.
const DB_FILE: &str = "bifrost.db";

/// Store error handling
/// - Wraps the underlying SQLite/pool failures so upstream components can
/// propagate a single error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("store task cancelled")]
    Cancelled,
}

/// Current wall-clock timestamp in milliseconds, the unit every persisted
/// timestamp column uses.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Pooled handle to the embedded database. Cheap to clone; every clone
/// shares the same pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open the database at `cache_dir/bifrost.db`, creating the directory
    /// if needed, and apply pending migrations. Migration failure is fatal
    /// to startup by design.
    pub fn open_in_dir(cache_dir: &Path) -> Result<Self, StoreError> {
        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            warn!(
                error = %e,
                dir = %cache_dir.display(),
                "Failed to create cache directory, falling back to open as-is"
            );
        }
        Self::open(&cache_dir.join(DB_FILE))
    }

    /// Open the database at an explicit path and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
        let pool = Pool::builder().max_size(8).build(manager)?;

        debug!(path = %path.display(), "Opened store database");

        let store = Self { pool };
        let mut conn = store.conn()?;
        migrations::apply(&mut conn)?;

        Ok(store)
    }

    /// Borrow a pooled connection synchronously. Intended for startup code
    /// and tests; async components should go through [`Store::with_conn`].
    pub fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Run `f` against a pooled connection on the blocking thread pool.
    ///
    /// This is the async boundary for all database work: the closure may
    /// open transactions and block freely without stalling the scheduler.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|_| StoreError::Cancelled)?
    }

    /// Append a row to `connection_log`. Best-effort: failures are logged
    /// and swallowed, a health row must never fail a state transition.
    pub async fn log_connection_state(
        &self,
        state: &'static str,
        latency_ms: Option<u64>,
        error_message: Option<String>,
    ) {
        let result = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO connection_log (timestamp, state, latency_ms, error_message)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        now_millis(),
                        state,
                        latency_ms.map(|l| l as i64),
                        error_message
                    ],
                )?;
                Ok(())
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, state, "Failed to record connection health row");
        }
    }
}

/// Per-connection pragmas: WAL journaling so a crash before fsync loses at
/// most one in-flight operation, busy timeout so pooled writers queue
/// instead of erroring.
fn configure_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    // journal_mode returns the resulting mode as a row.
    conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_dir(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_database_and_applies_schema() {
        let (dir, store) = temp_store();
        assert!(dir.path().join(DB_FILE).exists());

        let conn = store.conn().unwrap();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn with_conn_runs_on_blocking_pool() {
        let (_dir, store) = temp_store();

        let value = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT 41 + 1", [], |row| row.get::<_, i64>(0))?)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn connection_log_is_best_effort() {
        let (_dir, store) = temp_store();

        store
            .log_connection_state("connected", Some(12), None)
            .await;
        store
            .log_connection_state("reconnecting", None, Some("probe timed out".into()))
            .await;

        let rows: i64 = store
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM connection_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }
}
