// External crates
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Upstream transport error handling
/// - Failures are classified by transport outcome only; there is no
/// status-code-aware retry logic in the core.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream returned error: {0}")]
    Tool(String),
    #[error("upstream connection closed")]
    Closed,
}

/// Abstract client for the remote knowledge server.
///
/// The whole upstream surface reduces to one operation: invoke a named tool
/// with JSON arguments and get a result value or a transport error back.
/// `probe` is the minimal liveness check the ConnectionSupervisor uses to
/// arbitrate state transitions.
///
/// Three interchangeable transports implement this trait: a local child
/// process speaking line-delimited JSON RPC, a correlated event-stream
/// transport, and a plain request/response HTTP surface.
#[async_trait]
pub trait UpstreamClient: Send + Sync + fmt::Debug {
    /// Invoke `tool` with `args`, returning the tool's result value.
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, UpstreamError>;

    /// Minimal liveness check; returns the observed round-trip latency.
    async fn probe(&self) -> Result<Duration, UpstreamError>;
}
