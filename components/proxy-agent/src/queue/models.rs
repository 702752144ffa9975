// External crates
use serde::Serialize;
use std::fmt;

/// The six mutations the queue knows how to replay. The wire name doubles
/// as the upstream tool name invoked during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    CreateDocument,
    UpdateDocument,
    DeleteDocument,
    SetMemory,
    UpdateMemory,
    DeleteMemory,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDocument => "create_document",
            Self::UpdateDocument => "update_document",
            Self::DeleteDocument => "delete_document",
            Self::SetMemory => "set_memory",
            Self::UpdateMemory => "update_memory",
            Self::DeleteMemory => "delete_memory",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create_document" => Some(Self::CreateDocument),
            "update_document" => Some(Self::UpdateDocument),
            "delete_document" => Some(Self::DeleteDocument),
            "set_memory" => Some(Self::SetMemory),
            "update_memory" => Some(Self::UpdateMemory),
            "delete_memory" => Some(Self::DeleteMemory),
            _ => None,
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row status lifecycle: pending -> completed (deleted at end of pass) or
/// pending -> failed (kept until operator action).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable queue row, as persisted in `sync_queue`.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: i64,
    pub operation: String,
    pub payload: String,
    pub created_at: i64,
    pub status: QueueStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub synced: u64,
    pub failed: u64,
}

/// Aggregate queue accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub failed: u64,
    pub total: u64,
}
