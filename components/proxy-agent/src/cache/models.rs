// External crates
use serde::Serialize;

/// Document types that land in the critical tier. Derived once at insert
/// time; never flipped in place on an existing row.
pub const CRITICAL_DOC_TYPES: &[&str] = &["workflow", "rule", "agent", "template"];

/// Whether `doc_type` identifies durable, rarely-changing content that is
/// exempt from LRU eviction and from the dynamic-bytes budget.
pub fn is_critical_doc_type(doc_type: &str) -> bool {
    CRITICAL_DOC_TYPES.contains(&doc_type)
}

/// A cached document row, as returned by a read. `age_seconds` is computed
/// against the clock at read time, so it is always `>= 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDocument {
    pub doc_type: String,
    pub name: String,
    pub project: String,
    pub content: Vec<u8>,
    pub metadata: Option<String>,
    pub cached_at: i64,
    pub last_accessed_at: i64,
    pub is_critical: bool,
    pub size_bytes: u64,
    pub age_seconds: u64,
}

/// A cached memory row. Memories are always dynamic-tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMemory {
    pub name: String,
    pub project: String,
    pub content: Vec<u8>,
    pub metadata: Option<String>,
    pub cached_at: i64,
    pub last_accessed_at: i64,
    pub size_bytes: u64,
    pub age_seconds: u64,
}

/// Aggregate cache accounting across both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub critical_count: u64,
    pub critical_bytes: u64,
    pub dynamic_count: u64,
    pub dynamic_bytes: u64,
    pub total_count: u64,
    pub total_bytes: u64,
}
