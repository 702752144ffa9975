//! The uniform response envelope every tool call returns, serialized as
//! the textual payload of a single tool-result content block:
//!
//! ```json
//! {
//!   "data":  { ... },
//!   "error": { "code", "message", "suggestions" },
//!   "_metadata": { "source", "age_seconds", "status", "warning" }
//! }
//! ```

// Local crates
use crate::connection::models::ConnectionState;

// External crates
use serde::Serialize;
use serde_json::Value;

/// Where the answer came from. `StaleCache` is kept for backward envelope
/// compatibility; the current read path never produces it since TTL
/// expiration was replaced by push invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Live,
    Cache,
    StaleCache,
}

/// Error taxonomy surfaced to the client. Store failures are surfaced as
/// `ToolError` with the underlying message, never raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unavailable,
    Offline,
    ToolError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeMetadata {
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<u64>,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(rename = "_metadata")]
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    pub fn success(data: Value, source: Source, status: ConnectionState) -> Self {
        Self {
            data: Some(data),
            error: None,
            metadata: EnvelopeMetadata {
                source,
                age_seconds: None,
                status: status.as_str(),
                warning: None,
            },
        }
    }

    pub fn failure(error: ErrorBody, source: Source, status: ConnectionState) -> Self {
        Self {
            data: None,
            error: Some(error),
            metadata: EnvelopeMetadata {
                source,
                age_seconds: None,
                status: status.as_str(),
                warning: None,
            },
        }
    }

    pub fn with_age(mut self, age_seconds: u64) -> Self {
        self.metadata.age_seconds = Some(age_seconds);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.metadata.warning = Some(warning.into());
        self
    }
}

/// Suggestions for reads that found neither a cached row nor a reachable
/// upstream. Workflow reads get an extra fallback hint.
pub fn unavailable_suggestions(tool: &str) -> Vec<String> {
    let mut suggestions = vec![
        "Check that the upstream knowledge server is reachable".to_owned(),
        "Wait for automatic reconnection and retry".to_owned(),
    ];
    if tool == "get_workflow" {
        suggestions
            .push("Fall back to a previously fetched workflow of the same name".to_owned());
    }
    suggestions
}

/// Suggestions for pass-through tools rejected while not connected.
pub fn offline_suggestions() -> Vec<String> {
    vec![
        "Check that the upstream knowledge server is reachable".to_owned(),
        "Wait for automatic reconnection and retry".to_owned(),
        "Cached document and memory tools keep working offline".to_owned(),
    ]
}
