//! Plain request/response HTTP transport for the upstream knowledge server.
//!
//! Endpoint layout:
//! - POST `/mcp/document` for document tools
//! - POST `/mcp/memory` for memory tools
//! - POST `/mcp/tool` for everything else
//! - GET `/health` as the liveness probe
//!
//! Every request body is `{"tool": <name>, "arguments": <args>}`. An
//! optional bearer token rides in the `Authorization` header.

// Local crates
use crate::upstream::client::{UpstreamClient, UpstreamError};

// External crates
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, StatusCode, Uri,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-request wall-clock budget, distinct from the supervisor's probe
/// timeout which only covers `/health`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Upstream client over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl HttpUpstream {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn endpoint_for(tool: &str) -> &'static str {
        if tool.ends_with("_document") || tool == "get_workflow" || tool == "list_documents" {
            "/mcp/document"
        } else if tool.ends_with("_memory") || tool == "list_memories" {
            "/mcp/memory"
        } else {
            "/mcp/tool"
        }
    }

    fn uri(&self, path: &str) -> Result<Uri, UpstreamError> {
        format!("{}{path}", self.base_url)
            .parse()
            .map_err(|e| UpstreamError::Transport(format!("invalid upstream url: {e}")))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, UpstreamError> {
        let uri = self.uri(Self::endpoint_for(tool))?;
        let body = json!({"tool": tool, "arguments": args}).to_string();

        debug!(tool, %uri, "Dispatching upstream HTTP tool call");
        let (status, bytes) = request(
            &self.client,
            Method::POST,
            uri,
            self.api_key.as_deref(),
            Some(Bytes::from(body)),
            REQUEST_TIMEOUT,
        )
        .await?;

        if !status.is_success() {
            return Err(UpstreamError::Transport(format!(
                "upstream answered {status} for {tool}"
            )));
        }

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::Transport(format!("unreadable upstream body: {e}")))?;

        // The upstream reports tool-level failures in-band.
        if let Some(error) = value.get("error") {
            let message = error
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            return Err(UpstreamError::Tool(message));
        }

        Ok(value)
    }

    async fn probe(&self) -> Result<Duration, UpstreamError> {
        let uri = self.uri("/health")?;
        let started = Instant::now();

        let (status, _) = request(
            &self.client,
            Method::GET,
            uri,
            self.api_key.as_deref(),
            None,
            REQUEST_TIMEOUT,
        )
        .await?;

        if status.is_success() {
            Ok(started.elapsed())
        } else {
            Err(UpstreamError::Transport(format!(
                "health endpoint answered {status}"
            )))
        }
    }
}

/// Issue one HTTP request with an overall timeout; shared with the
/// event-stream transport for its POST side.
pub(crate) async fn request(
    client: &HttpClient,
    method: Method,
    uri: Uri,
    api_key: Option<&str>,
    body: Option<Bytes>,
    timeout: Duration,
) -> Result<(StatusCode, Bytes), UpstreamError> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(ACCEPT, "application/json");
    if body.is_some() {
        builder = builder.header(CONTENT_TYPE, "application/json");
    }
    if let Some(token) = api_key {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = builder
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| UpstreamError::Transport(format!("failed to build request: {e}")))?;

    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| UpstreamError::Timeout(timeout))?
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    let status = response.status();
    let bytes = tokio::time::timeout(timeout, response.into_body().collect())
        .await
        .map_err(|_| UpstreamError::Timeout(timeout))?
        .map_err(|e| UpstreamError::Transport(e.to_string()))?
        .to_bytes();

    Ok((status, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_map_to_their_endpoints() {
        assert_eq!(HttpUpstream::endpoint_for("create_document"), "/mcp/document");
        assert_eq!(HttpUpstream::endpoint_for("get_workflow"), "/mcp/document");
        assert_eq!(HttpUpstream::endpoint_for("list_documents"), "/mcp/document");
        assert_eq!(HttpUpstream::endpoint_for("set_memory"), "/mcp/memory");
        assert_eq!(HttpUpstream::endpoint_for("get_memory"), "/mcp/memory");
        assert_eq!(HttpUpstream::endpoint_for("search_codebase"), "/mcp/tool");
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let upstream = HttpUpstream::new("http://localhost:8080/", None);
        assert_eq!(
            upstream.uri("/health").unwrap().to_string(),
            "http://localhost:8080/health"
        );
    }
}
