//! Bidirectional event-stream transport.
//!
//! Requests are POSTed to `/rpc` with a correlation id; the server pushes
//! responses on a long-lived SSE channel at `/sse/rpc` as `rpc:response`
//! events carrying `{"id", "result" | "error"}`. A background worker owns
//! the stream and the in-flight correlation map, re-establishing the
//! channel with a fixed delay whenever it drops.

// Local crates
use crate::upstream::client::{UpstreamClient, UpstreamError};
use crate::upstream::http::request;
use crate::upstream::sse::SseParser;

// External crates
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, Uri,
    header::{ACCEPT, AUTHORIZATION},
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_RETRY_DELAY: Duration = Duration::from_secs(2);

type HttpClient = Client<HttpConnector, Full<Bytes>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, UpstreamError>>>>>;

/// Upstream client over the correlated event-stream transport.
#[derive(Debug)]
pub struct StreamUpstream {
    client: HttpClient,
    base_url: String,
    api_key: Option<String>,
    pending: Pending,
    next_id: AtomicU64,
    stream_open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl StreamUpstream {
    /// Build the client and start the response-stream worker.
    pub fn connect(base_url: &str, api_key: Option<String>) -> Arc<Self> {
        let upstream = Arc::new(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            stream_open: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(run_stream_worker(upstream.clone()));
        upstream
    }

    /// Tear down the response stream and fail whatever is in flight.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        fail_all_pending(&self.pending);
    }

    fn uri(&self, path: &str) -> Result<Uri, UpstreamError> {
        format!("{}{path}", self.base_url)
            .parse()
            .map_err(|e| UpstreamError::Transport(format!("invalid upstream url: {e}")))
    }
}

#[async_trait]
impl UpstreamClient for StreamUpstream {
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, UpstreamError> {
        if !self.stream_open.load(Ordering::Acquire) {
            // Without the response channel a POSTed request could be
            // accepted upstream while its answer is lost.
            return Err(UpstreamError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(id, reply_tx);

        let body = json!({"id": id, "tool": tool, "arguments": args}).to_string();
        let post = request(
            &self.client,
            Method::POST,
            self.uri("/rpc")?,
            self.api_key.as_deref(),
            Some(Bytes::from(body)),
            REQUEST_TIMEOUT,
        )
        .await;

        match post {
            Ok((status, _)) if status.is_success() => {}
            Ok((status, _)) => {
                self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                return Err(UpstreamError::Transport(format!(
                    "upstream answered {status} for {tool}"
                )));
            }
            Err(e) => {
                self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(UpstreamError::Closed),
            Err(_) => {
                self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                Err(UpstreamError::Timeout(REQUEST_TIMEOUT))
            }
        }
    }

    async fn probe(&self) -> Result<Duration, UpstreamError> {
        let started = Instant::now();
        let (status, _) = request(
            &self.client,
            Method::GET,
            self.uri("/health")?,
            self.api_key.as_deref(),
            None,
            REQUEST_TIMEOUT,
        )
        .await?;

        if status.is_success() && self.stream_open.load(Ordering::Acquire) {
            Ok(started.elapsed())
        } else if !status.is_success() {
            Err(UpstreamError::Transport(format!(
                "health endpoint answered {status}"
            )))
        } else {
            Err(UpstreamError::Transport(
                "response stream not established".into(),
            ))
        }
    }
}

/// Own the SSE response channel for the life of the client, reconnecting
/// with a fixed delay whenever it drops.
async fn run_stream_worker(upstream: Arc<StreamUpstream>) {
    loop {
        if upstream.cancel.is_cancelled() {
            return;
        }

        match read_stream(&upstream).await {
            Ok(()) => debug!("Upstream response stream ended"),
            Err(e) => warn!(error = %e, "Upstream response stream failed"),
        }

        upstream.stream_open.store(false, Ordering::Release);
        fail_all_pending(&upstream.pending);

        tokio::select! {
            _ = upstream.cancel.cancelled() => return,
            _ = tokio::time::sleep(STREAM_RETRY_DELAY) => {}
        }
    }
}

async fn read_stream(upstream: &Arc<StreamUpstream>) -> Result<(), UpstreamError> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(upstream.uri("/sse/rpc")?)
        .header(ACCEPT, "text/event-stream");
    if let Some(token) = upstream.api_key.as_deref() {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder
        .body(Full::new(Bytes::new()))
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    let response = upstream
        .client
        .request(request)
        .await
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;
    if !response.status().is_success() {
        return Err(UpstreamError::Transport(format!(
            "response stream answered {}",
            response.status()
        )));
    }

    debug!("Upstream response stream established");
    upstream.stream_open.store(true, Ordering::Release);

    let mut body = response.into_body();
    let mut parser = SseParser::new();

    loop {
        let frame = tokio::select! {
            _ = upstream.cancel.cancelled() => return Ok(()),
            frame = body.frame() => frame,
        };

        let Some(frame) = frame else {
            return Ok(());
        };
        let frame = frame.map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let Some(chunk) = frame.data_ref() else {
            continue;
        };

        for event in parser.feed(chunk) {
            if event.event.as_deref() == Some("rpc:response") {
                handle_response(&upstream.pending, &event.data);
            }
        }
    }
}

fn handle_response(pending: &Pending, data: &str) {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Dropping unparseable rpc:response event");
            return;
        }
    };
    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        warn!("Dropping rpc:response event without correlation id");
        return;
    };
    let Some(reply) = pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id) else {
        return;
    };

    let result = match value.get("error") {
        Some(error) => {
            let message = error
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            Err(UpstreamError::Tool(message))
        }
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = reply.send(result);
}

fn fail_all_pending(pending: &Pending) {
    let drained: Vec<_> = pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .drain()
        .collect();
    for (_, reply) in drained {
        let _ = reply.send(Err(UpstreamError::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlated_responses_complete_requests() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert(3, tx);

        handle_response(&pending, r#"{"id": 3, "result": [1, 2]}"#);

        assert_eq!(rx.blocking_recv().unwrap().unwrap(), json!([1, 2]));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn stream_loss_fails_in_flight_requests() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert(1, tx);

        fail_all_pending(&pending);

        match rx.blocking_recv().unwrap() {
            Err(UpstreamError::Closed) => {}
            other => panic!("expected closed, got {other:?}"),
        }
    }
}
