//! WriteQueue - responsibility and behavior
//!
//! The WriteQueue durably records mutations performed while the upstream is
//! unreachable and replays them in submission order once it returns.
//!
//! Key responsibilities:
//! - `enqueue` appends a pending row and returns only after the write is
//! durable in the `sync_queue` table.
//! - `replay` walks pending rows oldest-first and invokes the matching
//! upstream tool for each. Replay stops at the first failing row in a pass,
//! preserving the causal order of the session that produced the queue; the
//! failing row is retried on later passes until its bounded retry budget is
//! exhausted, at which point it moves to the terminal `failed` bucket and
//! stops blocking rows behind it.
//! - Operator surface: `list_failed`, `retry`, `clear_failed`, `stats`.
//!
//! Important design notes:
//! - A single in-process guard keeps at most one replay pass running; a
//! second concurrent call returns a zeroed outcome instead of double-sending.
//! - `enqueue` may run concurrently with a replay pass; new rows are simply
//! picked up by the next pass.
//! - Replay idempotency is the upstream's responsibility: mutations are
//! assumed safe to retry on a flaky link.

// Local crates
use crate::metrics::metrics::{QUEUE_PENDING, QUEUE_REPLAYED, QUEUE_TERMINAL_FAILURES};
use crate::queue::models::{QueueOperation, QueueRow, QueueStats, QueueStatus, ReplayOutcome};
use crate::store::store::{Store, StoreError, now_millis};
use crate::upstream::client::UpstreamClient;

// External crates
use rusqlite::params;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Default bounded-retry budget per row.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Durable FIFO of pending mutations over the shared [`Store`]. Cheap to
/// clone; clones share the replay guard.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    store: Store,
    upstream: Arc<dyn UpstreamClient>,
    max_attempts: u32,
    replaying: Arc<AtomicBool>,
}

/// RAII holder of the single-pass replay guard.
struct ReplayGuard {
    flag: Arc<AtomicBool>,
}

impl ReplayGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl WriteQueue {
    pub fn new(store: Store, upstream: Arc<dyn UpstreamClient>, max_attempts: u32) -> Self {
        Self {
            store,
            upstream,
            max_attempts: max_attempts.max(1),
            replaying: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Durably append a mutation. Returns the queue row id.
    pub async fn enqueue(
        &self,
        operation: QueueOperation,
        payload: &Value,
    ) -> Result<i64, StoreError> {
        let payload = payload.to_string();
        let op = operation.as_str();

        let id = self
            .store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO sync_queue (operation, payload, created_at, status, attempts)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                    params![op, payload, now_millis(), QueueStatus::Pending.as_str()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        debug!(id, operation = op, "Queued offline mutation");
        self.refresh_pending_gauge().await;
        Ok(id)
    }

    /// Count of rows still waiting for replay.
    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        self.store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
                    params![QueueStatus::Pending.as_str()],
                    |row| row.get::<_, i64>(0),
                )? as u64)
            })
            .await
    }

    /// Replay all pending rows in submission order.
    ///
    /// Skips (returning zeros) if another pass is already running. The pass
    /// stops at the first failure so rows behind a failing head are not
    /// applied out of causal order; completed rows are deleted at the end.
    pub async fn replay(&self) -> Result<ReplayOutcome, StoreError> {
        let Some(_guard) = ReplayGuard::acquire(&self.replaying) else {
            debug!("Replay already in progress, skipping pass");
            return Ok(ReplayOutcome::default());
        };

        let rows = self
            .store
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, operation, payload FROM sync_queue
                     WHERE status = ?1
                     ORDER BY created_at ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(params![QueueStatus::Pending.as_str()], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        if rows.is_empty() {
            return Ok(ReplayOutcome::default());
        }

        info!(pending = rows.len(), "Starting write-queue replay pass");
        let mut outcome = ReplayOutcome::default();

        for (id, operation, payload) in rows {
            let result = match serde_json::from_str::<Value>(&payload) {
                Ok(args) => self.upstream.invoke(&operation, args).await.map(|_| ()),
                Err(e) => Err(crate::upstream::client::UpstreamError::Transport(format!(
                    "unreadable queued payload: {e}"
                ))),
            };

            match result {
                Ok(()) => {
                    self.mark_completed(id).await?;
                    outcome.synced += 1;
                    QUEUE_REPLAYED.inc();
                }
                Err(e) => {
                    outcome.failed += 1;
                    let terminal = self.record_attempt(id, e.to_string()).await?;
                    warn!(
                        id,
                        operation,
                        error = %e,
                        terminal,
                        "Queued mutation failed to replay, stopping pass"
                    );
                    break;
                }
            }
        }

        self.delete_completed().await?;
        self.refresh_pending_gauge().await;

        info!(
            synced = outcome.synced,
            failed = outcome.failed,
            "Write-queue replay pass finished"
        );
        Ok(outcome)
    }

    /// Rows in the terminal `failed` bucket, oldest first.
    pub async fn list_failed(&self) -> Result<Vec<QueueRow>, StoreError> {
        self.store
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, operation, payload, created_at, status,
                            attempts, last_attempt_at, last_error
                     FROM sync_queue
                     WHERE status = ?1
                     ORDER BY created_at ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(params![QueueStatus::Failed.as_str()], |row| {
                        let status: String = row.get(4)?;
                        let status = QueueStatus::parse(&status).ok_or_else(|| {
                            rusqlite::Error::FromSqlConversionFailure(
                                4,
                                rusqlite::types::Type::Text,
                                format!("unknown queue status {status}").into(),
                            )
                        })?;
                        Ok(QueueRow {
                            id: row.get(0)?,
                            operation: row.get(1)?,
                            payload: row.get(2)?,
                            created_at: row.get(3)?,
                            status,
                            attempts: row.get::<_, i64>(5)? as u32,
                            last_attempt_at: row.get(6)?,
                            last_error: row.get(7)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Reset a failed row for another round of replay attempts. Returns
    /// whether a row was actually reset.
    pub async fn retry(&self, id: i64) -> Result<bool, StoreError> {
        let reset = self
            .store
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE sync_queue
                     SET status = ?1, attempts = 0, last_error = NULL
                     WHERE id = ?2 AND status = ?3",
                    params![
                        QueueStatus::Pending.as_str(),
                        id,
                        QueueStatus::Failed.as_str()
                    ],
                )? > 0)
            })
            .await?;

        self.refresh_pending_gauge().await;
        Ok(reset)
    }

    /// Drop every row in the terminal `failed` bucket. Returns the number
    /// of rows removed.
    pub async fn clear_failed(&self) -> Result<u64, StoreError> {
        self.store
            .with_conn(|conn| {
                Ok(conn.execute(
                    "DELETE FROM sync_queue WHERE status = ?1",
                    params![QueueStatus::Failed.as_str()],
                )? as u64)
            })
            .await
    }

    /// Aggregate queue accounting.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.store
            .with_conn(|conn| {
                let pending: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
                    params![QueueStatus::Pending.as_str()],
                    |row| row.get(0),
                )?;
                let failed: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
                    params![QueueStatus::Failed.as_str()],
                    |row| row.get(0),
                )?;
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
                Ok(QueueStats {
                    pending: pending as u64,
                    failed: failed as u64,
                    total: total as u64,
                })
            })
            .await
    }

    async fn mark_completed(&self, id: i64) -> Result<(), StoreError> {
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sync_queue SET status = ?1, last_attempt_at = ?2
                     WHERE id = ?3",
                    params![QueueStatus::Completed.as_str(), now_millis(), id],
                )?;
                Ok(())
            })
            .await
    }

    /// Record a failed attempt; moves the row to `failed` once the retry
    /// budget is exhausted. Returns whether the failure was terminal.
    async fn record_attempt(&self, id: i64, error: String) -> Result<bool, StoreError> {
        let max_attempts = self.max_attempts;

        let terminal = self
            .store
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let attempts: u32 = tx.query_row(
                    "SELECT attempts FROM sync_queue WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, i64>(0).map(|a| a as u32),
                )?;

                let attempts = attempts + 1;
                let terminal = attempts >= max_attempts;
                let status = if terminal {
                    QueueStatus::Failed
                } else {
                    QueueStatus::Pending
                };

                tx.execute(
                    "UPDATE sync_queue
                     SET attempts = ?1, status = ?2, last_attempt_at = ?3, last_error = ?4
                     WHERE id = ?5",
                    params![attempts, status.as_str(), now_millis(), error, id],
                )?;
                tx.commit()?;
                Ok(terminal)
            })
            .await?;

        if terminal {
            QUEUE_TERMINAL_FAILURES.inc();
        }
        Ok(terminal)
    }

    async fn delete_completed(&self) -> Result<(), StoreError> {
        self.store
            .with_conn(|conn| {
                conn.execute(
                    "DELETE FROM sync_queue WHERE status = ?1",
                    params![QueueStatus::Completed.as_str()],
                )?;
                Ok(())
            })
            .await
    }

    async fn refresh_pending_gauge(&self) {
        if let Ok(pending) = self.pending_count().await {
            QUEUE_PENDING.set(pending as f64);
        }
    }
}
