//! CacheEngine - responsibility and behavior
//!
//! The CacheEngine serves reads, absorbs writes, enforces the dynamic-tier
//! byte budget, and accepts push-driven invalidations. Rows live in two
//! logical tables (`documents`, `memories`) split across two tiers:
//!
//! - Critical tier: documents whose type is one of
//!   [`crate::cache::models::CRITICAL_DOC_TYPES`]. Never evicted, never
//!   counted against the dynamic budget.
//! - Dynamic tier: every other document plus all memories. Evicted in LRU
//!   order (ascending `last_accessed_at`, ties broken by insertion order)
//!   whenever an insert would push the tier over `max_dynamic_bytes`.
//!
//! Important design notes:
//! - Each public operation is one short SQLite transaction, so concurrent
//! callers interleave at operation granularity and never observe a partial
//! row.
//! - The read path bumps `last_accessed_at` inside the same transaction as
//! the read, so a concurrent eviction cannot select a row that was just
//! observed.
//! - A single item larger than the whole budget is still stored; eviction
//! clears everything else instead of refusing the write, because refusing
//! would silently lose data written while offline.

// Local crates
use crate::cache::models::{CacheStats, CachedDocument, CachedMemory, is_critical_doc_type};
use crate::metrics::metrics::{CACHE_DYNAMIC_BYTES, CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES};
use crate::store::store::{Store, StoreError, now_millis};

// External crates
use rusqlite::{OptionalExtension, Transaction, params};
use tracing::debug;

/// Two-tier persistent cache over the shared [`Store`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CacheEngine {
    store: Store,
    max_dynamic_bytes: u64,
}

impl CacheEngine {
    pub fn new(store: Store, max_dynamic_bytes: u64) -> Self {
        Self {
            store,
            max_dynamic_bytes,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Look up a document by its composite key. On hit, `last_accessed_at`
    /// is bumped atomically with the read.
    pub async fn get_document(
        &self,
        doc_type: &str,
        name: &str,
        project: &str,
    ) -> Result<Option<CachedDocument>, StoreError> {
        let (doc_type, name, project) =
            (doc_type.to_owned(), name.to_owned(), project.to_owned());

        let found = self
            .store
            .with_conn(move |conn| {
                let now = now_millis();
                let tx = conn.transaction()?;

                let row = tx
                    .query_row(
                        "SELECT id, content, metadata, cached_at, last_accessed_at,
                                is_critical, size_bytes
                         FROM documents
                         WHERE doc_type = ?1 AND name = ?2 AND project = ?3",
                        params![doc_type, name, project],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, Vec<u8>>(1)?,
                                row.get::<_, Option<String>>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, i64>(4)?,
                                row.get::<_, bool>(5)?,
                                row.get::<_, i64>(6)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((id, content, metadata, cached_at, last_accessed_at, is_critical, size)) =
                    row
                else {
                    tx.commit()?;
                    return Ok(None);
                };

                let touched = now.max(last_accessed_at);
                tx.execute(
                    "UPDATE documents SET last_accessed_at = ?1 WHERE id = ?2",
                    params![touched, id],
                )?;
                tx.commit()?;

                Ok(Some(CachedDocument {
                    doc_type,
                    name,
                    project,
                    content,
                    metadata,
                    cached_at,
                    last_accessed_at: touched,
                    is_critical,
                    size_bytes: size as u64,
                    age_seconds: age_seconds(now, cached_at),
                }))
            })
            .await?;

        record_lookup(found.is_some());
        Ok(found)
    }

    /// Look up a memory by its composite key. Symmetric with
    /// [`CacheEngine::get_document`].
    pub async fn get_memory(
        &self,
        name: &str,
        project: &str,
    ) -> Result<Option<CachedMemory>, StoreError> {
        let (name, project) = (name.to_owned(), project.to_owned());

        let found = self
            .store
            .with_conn(move |conn| {
                let now = now_millis();
                let tx = conn.transaction()?;

                let row = tx
                    .query_row(
                        "SELECT id, content, metadata, cached_at, last_accessed_at, size_bytes
                         FROM memories
                         WHERE name = ?1 AND project = ?2",
                        params![name, project],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, Vec<u8>>(1)?,
                                row.get::<_, Option<String>>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, i64>(4)?,
                                row.get::<_, i64>(5)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((id, content, metadata, cached_at, last_accessed_at, size)) = row else {
                    tx.commit()?;
                    return Ok(None);
                };

                let touched = now.max(last_accessed_at);
                tx.execute(
                    "UPDATE memories SET last_accessed_at = ?1 WHERE id = ?2",
                    params![touched, id],
                )?;
                tx.commit()?;

                Ok(Some(CachedMemory {
                    name,
                    project,
                    content,
                    metadata,
                    cached_at,
                    last_accessed_at: touched,
                    size_bytes: size as u64,
                    age_seconds: age_seconds(now, cached_at),
                }))
            })
            .await?;

        record_lookup(found.is_some());
        Ok(found)
    }

    /// Insert or overwrite a document. Non-critical inserts make room in the
    /// dynamic tier first; the eviction and the upsert share one transaction
    /// so the budget is only exceeded transiently inside it.
    pub async fn set_document(
        &self,
        doc_type: &str,
        name: &str,
        content: Vec<u8>,
        project: &str,
        metadata: Option<String>,
    ) -> Result<(), StoreError> {
        let critical = is_critical_doc_type(doc_type);
        let size = content.len() as i64;
        let max = self.max_dynamic_bytes as i64;
        let (doc_type, name, project) =
            (doc_type.to_owned(), name.to_owned(), project.to_owned());

        let dynamic_bytes = self
            .store
            .with_conn(move |conn| {
                let now = now_millis();
                let tx = conn.transaction()?;

                if !critical {
                    evict_for(&tx, max, size)?;
                }

                tx.execute(
                    "INSERT INTO documents
                         (doc_type, name, project, content, metadata,
                          cached_at, last_accessed_at, is_critical, size_bytes)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)
                     ON CONFLICT (doc_type, name, project) DO UPDATE SET
                         content          = excluded.content,
                         metadata         = excluded.metadata,
                         cached_at        = excluded.cached_at,
                         last_accessed_at = excluded.last_accessed_at,
                         is_critical      = excluded.is_critical,
                         size_bytes       = excluded.size_bytes",
                    params![doc_type, name, project, content, metadata, now, critical, size],
                )?;

                let dynamic = dynamic_tier_bytes(&tx)?;
                tx.commit()?;
                Ok(dynamic)
            })
            .await?;

        CACHE_DYNAMIC_BYTES.set(dynamic_bytes as f64);
        Ok(())
    }

    /// Insert or overwrite a memory. Memories are always dynamic-tier, so
    /// every insert goes through capacity enforcement.
    pub async fn set_memory(
        &self,
        name: &str,
        content: Vec<u8>,
        project: &str,
        metadata: Option<String>,
    ) -> Result<(), StoreError> {
        let size = content.len() as i64;
        let max = self.max_dynamic_bytes as i64;
        let (name, project) = (name.to_owned(), project.to_owned());

        let dynamic_bytes = self
            .store
            .with_conn(move |conn| {
                let now = now_millis();
                let tx = conn.transaction()?;

                evict_for(&tx, max, size)?;

                tx.execute(
                    "INSERT INTO memories
                         (name, project, content, metadata,
                          cached_at, last_accessed_at, size_bytes)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
                     ON CONFLICT (name, project) DO UPDATE SET
                         content          = excluded.content,
                         metadata         = excluded.metadata,
                         cached_at        = excluded.cached_at,
                         last_accessed_at = excluded.last_accessed_at,
                         size_bytes       = excluded.size_bytes",
                    params![name, project, content, metadata, now, size],
                )?;

                let dynamic = dynamic_tier_bytes(&tx)?;
                tx.commit()?;
                Ok(dynamic)
            })
            .await?;

        CACHE_DYNAMIC_BYTES.set(dynamic_bytes as f64);
        Ok(())
    }

    /// Hard-delete a document. Missing rows are not an error.
    pub async fn invalidate_document(
        &self,
        doc_type: &str,
        name: &str,
        project: &str,
    ) -> Result<(), StoreError> {
        let (doc_type, name, project) =
            (doc_type.to_owned(), name.to_owned(), project.to_owned());

        self.store
            .with_conn(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM documents
                     WHERE doc_type = ?1 AND name = ?2 AND project = ?3",
                    params![doc_type, name, project],
                )?;
                debug!(doc_type, name, project, removed, "Invalidated document");
                Ok(())
            })
            .await
    }

    /// Hard-delete a memory. Missing rows are not an error.
    pub async fn invalidate_memory(&self, name: &str, project: &str) -> Result<(), StoreError> {
        let (name, project) = (name.to_owned(), project.to_owned());

        self.store
            .with_conn(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM memories WHERE name = ?1 AND project = ?2",
                    params![name, project],
                )?;
                debug!(name, project, removed, "Invalidated memory");
                Ok(())
            })
            .await
    }

    /// Administrative clear of both tables, both tiers.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM documents", [])?;
                tx.execute("DELETE FROM memories", [])?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        CACHE_DYNAMIC_BYTES.set(0.0);
        Ok(())
    }

    /// Aggregate counts and byte totals per tier.
    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        self.store
            .with_conn(|conn| {
                let tx = conn.transaction()?;

                let (critical_count, critical_bytes): (u64, u64) = tx.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)
                     FROM documents WHERE is_critical = 1",
                    [],
                    |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
                )?;

                let (dyn_doc_count, dyn_doc_bytes): (u64, u64) = tx.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)
                     FROM documents WHERE is_critical = 0",
                    [],
                    |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
                )?;

                let (memory_count, memory_bytes): (u64, u64) = tx.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM memories",
                    [],
                    |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
                )?;

                tx.commit()?;

                let dynamic_count = dyn_doc_count + memory_count;
                let dynamic_bytes = dyn_doc_bytes + memory_bytes;

                Ok(CacheStats {
                    critical_count,
                    critical_bytes,
                    dynamic_count,
                    dynamic_bytes,
                    total_count: critical_count + dynamic_count,
                    total_bytes: critical_bytes + dynamic_bytes,
                })
            })
            .await
    }
}

fn age_seconds(now: i64, cached_at: i64) -> u64 {
    ((now - cached_at).max(0) / 1000) as u64
}

fn record_lookup(hit: bool) {
    if hit {
        CACHE_HITS.inc();
    } else {
        CACHE_MISSES.inc();
    }
}

/// Sum of `size_bytes` over the dynamic tier: non-critical documents plus
/// all memories.
fn dynamic_tier_bytes(tx: &Transaction<'_>) -> Result<i64, StoreError> {
    Ok(tx.query_row(
        "SELECT COALESCE((SELECT SUM(size_bytes) FROM documents WHERE is_critical = 0), 0)
              + COALESCE((SELECT SUM(size_bytes) FROM memories), 0)",
        [],
        |row| row.get(0),
    )?)
}

/// One eviction candidate. `table_rank` keeps documents ahead of memories
/// at equal `last_accessed_at`, which satisfies the shared-LRU ordering
/// requirement while keeping the scan per-table.
struct Candidate {
    last_accessed_at: i64,
    table_rank: u8,
    id: i64,
    size_bytes: i64,
}

/// Make room for `required` bytes in the dynamic tier.
///
/// Walks non-critical rows across both tables in ascending
/// (`last_accessed_at`, table, id) order, deleting until enough bytes are
/// freed. Critical rows are never inspected. An item larger than the whole
/// budget evicts everything else and is then stored anyway.
fn evict_for(tx: &Transaction<'_>, max_dynamic_bytes: i64, required: i64) -> Result<(), StoreError> {
    let dynamic = dynamic_tier_bytes(tx)?;
    if dynamic + required <= max_dynamic_bytes {
        return Ok(());
    }
    let to_free = dynamic + required - max_dynamic_bytes;

    let mut candidates: Vec<Candidate> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT id, last_accessed_at, size_bytes
             FROM documents WHERE is_critical = 0
             ORDER BY last_accessed_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Candidate {
                id: row.get(0)?,
                last_accessed_at: row.get(1)?,
                size_bytes: row.get(2)?,
                table_rank: 0,
            })
        })?;
        for row in rows {
            candidates.push(row?);
        }

        let mut stmt = tx.prepare(
            "SELECT id, last_accessed_at, size_bytes
             FROM memories
             ORDER BY last_accessed_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Candidate {
                id: row.get(0)?,
                last_accessed_at: row.get(1)?,
                size_bytes: row.get(2)?,
                table_rank: 1,
            })
        })?;
        for row in rows {
            candidates.push(row?);
        }
    }

    candidates.sort_by_key(|c| (c.last_accessed_at, c.table_rank, c.id));

    let mut freed = 0i64;
    let mut evicted = 0u64;
    for candidate in candidates {
        if freed >= to_free {
            break;
        }
        let table = if candidate.table_rank == 0 {
            "documents"
        } else {
            "memories"
        };
        tx.execute(
            &format!("DELETE FROM {table} WHERE id = ?1"),
            params![candidate.id],
        )?;
        freed += candidate.size_bytes;
        evicted += 1;
    }

    if evicted > 0 {
        CACHE_EVICTIONS.inc_by(evicted as f64);
        debug!(evicted, freed, to_free, "Evicted dynamic-tier rows");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_with_budget(max_dynamic_bytes: u64) -> (tempfile::TempDir, CacheEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_dir(dir.path()).unwrap();
        (dir, CacheEngine::new(store, max_dynamic_bytes))
    }

    /// Force a row's recency directly, so LRU ordering in tests does not
    /// depend on millisecond clock resolution.
    fn set_last_accessed(engine: &CacheEngine, table: &str, name: &str, value: i64) {
        engine
            .store()
            .conn()
            .unwrap()
            .execute(
                &format!("UPDATE {table} SET last_accessed_at = ?1 WHERE name = ?2"),
                params![value, name],
            )
            .unwrap();
    }

    fn content(len: usize) -> Vec<u8> {
        vec![b'x'; len]
    }

    #[tokio::test]
    async fn set_then_get_round_trips_content_and_metadata() {
        let (_dir, engine) = engine_with_budget(10_000).await;

        let metadata = Some(r#"{"author":"dev","tags":["a","b"]}"#.to_string());
        engine
            .set_document("frd", "login-flow", b"# FRD".to_vec(), "proj", metadata.clone())
            .await
            .unwrap();

        let row = engine
            .get_document("frd", "login-flow", "proj")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.content, b"# FRD");
        assert_eq!(row.metadata, metadata);
        assert_eq!(row.size_bytes, 5);
        assert!(!row.is_critical);
        assert!(row.age_seconds < 5);
    }

    #[tokio::test]
    async fn global_and_project_scoped_rows_are_distinct() {
        let (_dir, engine) = engine_with_budget(10_000).await;

        engine
            .set_memory("ctx", b"global".to_vec(), "", None)
            .await
            .unwrap();
        engine
            .set_memory("ctx", b"scoped".to_vec(), "proj", None)
            .await
            .unwrap();

        let global = engine.get_memory("ctx", "").await.unwrap().unwrap();
        let scoped = engine.get_memory("ctx", "proj").await.unwrap().unwrap();
        assert_eq!(global.content, b"global");
        assert_eq!(scoped.content, b"scoped");
    }

    #[tokio::test]
    async fn get_bumps_last_accessed_at() {
        let (_dir, engine) = engine_with_budget(10_000).await;

        engine
            .set_document("frd", "doc", content(10), "", None)
            .await
            .unwrap();
        set_last_accessed(&engine, "documents", "doc", 100);

        let row = engine.get_document("frd", "doc", "").await.unwrap().unwrap();
        assert!(row.last_accessed_at > 100);

        let stored: i64 = engine
            .store()
            .conn()
            .unwrap()
            .query_row(
                "SELECT last_accessed_at FROM documents WHERE name = 'doc'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored, row.last_accessed_at);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let (_dir, engine) = engine_with_budget(10_000).await;

        engine
            .set_document("rule", "style", content(10), "", None)
            .await
            .unwrap();

        engine.invalidate_document("rule", "style", "").await.unwrap();
        assert!(engine.get_document("rule", "style", "").await.unwrap().is_none());

        // Absent row: still not an error.
        engine.invalidate_document("rule", "style", "").await.unwrap();
        engine.invalidate_memory("never-existed", "").await.unwrap();
    }

    #[tokio::test]
    async fn eviction_respects_critical_tier() {
        // Scenario: four critical workflows (12 000 bytes) over a 10 000
        // byte dynamic budget, then four non-critical frd rows of 3 000.
        let (_dir, engine) = engine_with_budget(10_000).await;

        for i in 0..4 {
            engine
                .set_document("workflow", &format!("wf-{i}"), content(3_000), "", None)
                .await
                .unwrap();
        }
        for i in 0..3 {
            engine
                .set_document("frd", &format!("frd-{i}"), content(3_000), "", None)
                .await
                .unwrap();
            set_last_accessed(&engine, "documents", &format!("frd-{i}"), 100 + i as i64);
        }

        engine
            .set_document("frd", "frd-3", content(3_000), "", None)
            .await
            .unwrap();

        for i in 0..4 {
            assert!(
                engine
                    .get_document("workflow", &format!("wf-{i}"), "")
                    .await
                    .unwrap()
                    .is_some(),
                "critical row wf-{i} must survive eviction"
            );
        }
        assert!(engine.get_document("frd", "frd-0", "").await.unwrap().is_none());
        for name in ["frd-1", "frd-2", "frd-3"] {
            assert!(engine.get_document("frd", name, "").await.unwrap().is_some());
        }

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.critical_count, 4);
        assert_eq!(stats.critical_bytes, 12_000);
        assert!(stats.dynamic_bytes <= 10_000 + 3_000);
    }

    #[tokio::test]
    async fn lru_ordering_follows_access_not_insertion() {
        let (_dir, engine) = engine_with_budget(9_000).await;

        for (i, name) in ["d1", "d2", "d3"].iter().enumerate() {
            engine
                .set_document("frd", name, content(3_000), "", None)
                .await
                .unwrap();
            set_last_accessed(&engine, "documents", name, 100 + i as i64);
        }

        // Reading d1 makes it the most recently used.
        engine.get_document("frd", "d1", "").await.unwrap().unwrap();

        // d4 forces one eviction; d2 is now the oldest.
        engine
            .set_document("frd", "d4", content(3_000), "", None)
            .await
            .unwrap();

        assert!(engine.get_document("frd", "d2", "").await.unwrap().is_none());
        for name in ["d1", "d3", "d4"] {
            assert!(
                engine.get_document("frd", name, "").await.unwrap().is_some(),
                "{name} should have survived"
            );
        }
    }

    #[tokio::test]
    async fn memories_and_documents_share_one_lru_ordering() {
        let (_dir, engine) = engine_with_budget(9_000).await;

        engine
            .set_document("frd", "doc-old", content(3_000), "", None)
            .await
            .unwrap();
        engine
            .set_memory("mem-older", content(3_000), "", None)
            .await
            .unwrap();
        engine
            .set_memory("mem-new", content(3_000), "", None)
            .await
            .unwrap();
        set_last_accessed(&engine, "documents", "doc-old", 200);
        set_last_accessed(&engine, "memories", "mem-older", 100);
        set_last_accessed(&engine, "memories", "mem-new", 300);

        // The memory is older than both documents, so it goes first.
        engine
            .set_document("frd", "doc-new", content(3_000), "", None)
            .await
            .unwrap();

        assert!(engine.get_memory("mem-older", "").await.unwrap().is_none());
        assert!(engine.get_document("frd", "doc-old", "").await.unwrap().is_some());
        assert!(engine.get_memory("mem-new", "").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversize_item_is_stored_after_clearing_the_tier() {
        let (_dir, engine) = engine_with_budget(5_000).await;

        engine
            .set_document("frd", "small", content(2_000), "", None)
            .await
            .unwrap();
        engine
            .set_memory("tiny", content(1_000), "", None)
            .await
            .unwrap();

        // 8 000 bytes exceeds the entire 5 000 byte budget.
        engine
            .set_document("frd", "huge", content(8_000), "", None)
            .await
            .unwrap();

        assert!(engine.get_document("frd", "huge", "").await.unwrap().is_some());
        assert!(engine.get_document("frd", "small", "").await.unwrap().is_none());
        assert!(engine.get_memory("tiny", "").await.unwrap().is_none());

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.dynamic_count, 1);
        assert_eq!(stats.dynamic_bytes, 8_000);
    }

    #[tokio::test]
    async fn eviction_ties_break_by_insertion_order() {
        let (_dir, engine) = engine_with_budget(9_000).await;

        for name in ["t1", "t2", "t3"] {
            engine
                .set_document("frd", name, content(3_000), "", None)
                .await
                .unwrap();
            set_last_accessed(&engine, "documents", name, 500);
        }

        engine
            .set_document("frd", "t4", content(3_000), "", None)
            .await
            .unwrap();

        // All three ties at 500; lowest rowid (t1, inserted first) goes.
        assert!(engine.get_document("frd", "t1", "").await.unwrap().is_none());
        assert!(engine.get_document("frd", "t2", "").await.unwrap().is_some());
        assert!(engine.get_document("frd", "t3", "").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_recomputes_size_and_cached_at() {
        let (_dir, engine) = engine_with_budget(10_000).await;

        engine
            .set_document("frd", "doc", content(100), "", None)
            .await
            .unwrap();
        let first = engine.get_document("frd", "doc", "").await.unwrap().unwrap();

        engine
            .set_document("frd", "doc", content(250), "", Some("{}".into()))
            .await
            .unwrap();
        let second = engine.get_document("frd", "doc", "").await.unwrap().unwrap();

        assert_eq!(second.size_bytes, 250);
        assert_eq!(second.metadata.as_deref(), Some("{}"));
        assert!(second.cached_at >= first.cached_at);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.dynamic_count, 1);
        assert_eq!(stats.dynamic_bytes, 250);
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let (_dir, engine) = engine_with_budget(10_000).await;

        engine
            .set_document("workflow", "wf", content(10), "", None)
            .await
            .unwrap();
        engine.set_memory("m", content(10), "", None).await.unwrap();

        engine.clear().await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.total_bytes, 0);
    }
}
