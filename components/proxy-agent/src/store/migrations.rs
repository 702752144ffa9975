// Local crates
use crate::store::store::StoreError;

// External crates
use rusqlite::Connection;
use tracing::info;

/// Numbered schema migrations, applied in order at startup.
///
/// The SQLite `user_version` pragma records how many entries of this list
/// have already been applied, so re-running the sequence is idempotent.
/// Each entry runs inside its own transaction; a failure aborts startup.
const MIGRATIONS: &[&str] = &[
    // 0001 - cache tables and the durable write-ahead queue
    "
    CREATE TABLE documents (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_type         TEXT NOT NULL,
        name             TEXT NOT NULL,
        project          TEXT NOT NULL DEFAULT '',
        content          BLOB NOT NULL,
        metadata         TEXT,
        cached_at        INTEGER NOT NULL,
        last_accessed_at INTEGER NOT NULL,
        is_critical      INTEGER NOT NULL DEFAULT 0,
        size_bytes       INTEGER NOT NULL,
        UNIQUE (doc_type, name, project)
    );

    CREATE INDEX idx_documents_lru
        ON documents (is_critical, last_accessed_at, id);

    CREATE TABLE memories (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        name             TEXT NOT NULL,
        project          TEXT NOT NULL DEFAULT '',
        content          BLOB NOT NULL,
        metadata         TEXT,
        cached_at        INTEGER NOT NULL,
        last_accessed_at INTEGER NOT NULL,
        size_bytes       INTEGER NOT NULL,
        UNIQUE (name, project)
    );

    CREATE INDEX idx_memories_lru
        ON memories (last_accessed_at, id);

    CREATE TABLE sync_queue (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        operation       TEXT NOT NULL,
        payload         TEXT NOT NULL,
        created_at      INTEGER NOT NULL,
        status          TEXT NOT NULL DEFAULT 'pending',
        attempts        INTEGER NOT NULL DEFAULT 0,
        last_attempt_at INTEGER,
        last_error      TEXT
    );

    CREATE INDEX idx_sync_queue_status
        ON sync_queue (status, created_at, id);
    ",
    // 0002 - best-effort connection health log
    "
    CREATE TABLE connection_log (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp     INTEGER NOT NULL,
        state         TEXT NOT NULL,
        latency_ms    INTEGER,
        error_message TEXT
    );
    ",
];

/// Apply all pending migrations on `conn`.
///
/// A half-applied migration rolls back with its transaction, leaving
/// `user_version` pointing at the last fully-applied entry.
pub fn apply(conn: &mut Connection) -> Result<(), StoreError> {
    let applied: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        let version = idx + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version as i64)?;
        tx.commit()?;

        info!(version, "Applied store schema migration");
    }

    Ok(())
}
