//! InvalidationListener - responsibility and behavior
//!
//! Consumes the long-lived push stream of cache-invalidation events at
//! `/sse/cache-invalidation` on the upstream base URL and translates each
//! event into CacheEngine invalidations.
//!
//! Event contract (JSON `data` per named event):
//! - `document:invalidate` - `{ "type": "document", "docType", "name", "project"? }`
//! - `memory:invalidate`   - `{ "type": "memory", "name", "project"? }`
//! - `cache:invalidate:batch` - an array of the two shapes above
//!
//! Important design notes:
//! - Malformed events are logged and swallowed; they never crash the
//! stream.
//! - On stream error the connection is closed and re-established after a
//! fixed delay until `stop()` is called.
//! - `start()`/`stop()` are idempotent; `is_listening()` reflects whether
//! the underlying stream is currently open.

// Local crates
use crate::cache::engine::CacheEngine;
use crate::upstream::sse::SseParser;

// External crates
use bytes::Bytes;
use futures::future::join_all;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request,
    header::{ACCEPT, AUTHORIZATION},
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use serde::Deserialize;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Well-known push-invalidation path on the upstream base URL.
const INVALIDATION_PATH: &str = "/sse/cache-invalidation";

/// Fixed delay between reconnect attempts after a stream failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One invalidation instruction, as carried by either a single event or a
/// batch member.
#[derive(Debug, Deserialize)]
struct InvalidationPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "docType")]
    doc_type: Option<String>,
    name: Option<String>,
    #[serde(default)]
    project: String,
}

/// Push-invalidation consumer. Shared behind an `Arc`.
#[derive(Debug)]
pub struct InvalidationListener {
    engine: CacheEngine,
    base_url: String,
    api_key: Option<String>,
    reconnect_delay: Duration,
    listening: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationListener {
    pub fn new(
        engine: CacheEngine,
        base_url: &str,
        api_key: Option<String>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            engine,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            reconnect_delay,
            listening: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Connect to the invalidation stream and keep it alive until
    /// `stop()`. Idempotent while a worker is running.
    pub fn start(&self) {
        let mut worker_slot = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker_slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Invalidation listener already running, ignoring start");
            return;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());

        let engine = self.engine.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let reconnect_delay = self.reconnect_delay;
        let listening = self.listening.clone();

        *worker_slot = Some(tokio::spawn(async move {
            run_worker(engine, base_url, api_key, reconnect_delay, listening, cancel).await;
        }));
        info!("Invalidation listener started");
    }

    /// Close the stream and stop reconnecting. Idempotent.
    pub async fn stop(&self) {
        let cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.listening.store(false, Ordering::Release);
    }

    /// Whether the underlying stream is currently open and the listener
    /// has not been stopped.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }
}

async fn run_worker(
    engine: CacheEngine,
    base_url: String,
    api_key: Option<String>,
    reconnect_delay: Duration,
    listening: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match consume_stream(&client, &engine, &base_url, api_key.as_deref(), &listening, &cancel)
            .await
        {
            Ok(()) => debug!("Invalidation stream closed"),
            Err(e) => warn!(error = %e, "Invalidation stream failed"),
        }
        listening.store(false, Ordering::Release);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

async fn consume_stream(
    client: &Client<HttpConnector, Full<Bytes>>,
    engine: &CacheEngine,
    base_url: &str,
    api_key: Option<&str>,
    listening: &Arc<AtomicBool>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(format!("{base_url}{INVALIDATION_PATH}"))
        .header(ACCEPT, "text/event-stream");
    if let Some(token) = api_key {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder.body(Full::new(Bytes::new()))?;

    let response = client.request(request).await?;
    if !response.status().is_success() {
        anyhow::bail!("invalidation stream answered {}", response.status());
    }

    info!("Invalidation stream established");
    listening.store(true, Ordering::Release);

    let mut body = response.into_body();
    let mut parser = SseParser::new();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = body.frame() => frame,
        };

        let Some(frame) = frame else {
            return Ok(());
        };
        let Some(chunk) = frame?.data_ref().cloned() else {
            continue;
        };

        for event in parser.feed(&chunk) {
            if let Some(name) = event.event.as_deref() {
                handle_event(engine, name, &event.data).await;
            }
        }
    }
}

/// Translate one named invalidation event into CacheEngine calls.
/// Parsing failures are logged and swallowed so the stream stays up.
pub async fn handle_event(engine: &CacheEngine, event: &str, data: &str) {
    match event {
        "document:invalidate" | "memory:invalidate" => {
            match serde_json::from_str::<InvalidationPayload>(data) {
                Ok(payload) => apply(engine, payload).await,
                Err(e) => warn!(event, error = %e, "Ignoring unparseable invalidation event"),
            }
        }

        "cache:invalidate:batch" => {
            match serde_json::from_str::<Vec<InvalidationPayload>>(data) {
                Ok(batch) => {
                    // Batch members are independent keys; apply them
                    // concurrently.
                    join_all(batch.into_iter().map(|payload| apply(engine, payload))).await;
                }
                Err(e) => warn!(error = %e, "Ignoring unparseable invalidation batch"),
            }
        }

        other => debug!(event = other, "Ignoring unknown invalidation event type"),
    }
}

async fn apply(engine: &CacheEngine, payload: InvalidationPayload) {
    let Some(name) = payload.name.as_deref() else {
        warn!("Ignoring invalidation without a name");
        return;
    };

    let result = match payload.kind.as_deref() {
        Some("memory") => engine.invalidate_memory(name, &payload.project).await,
        // Single document events may omit the redundant `type` field.
        Some("document") | None => {
            let Some(doc_type) = payload.doc_type.as_deref() else {
                warn!(name, "Ignoring document invalidation without docType");
                return;
            };
            engine
                .invalidate_document(doc_type, name, &payload.project)
                .await
        }
        Some(other) => {
            warn!(kind = other, name, "Ignoring invalidation of unknown kind");
            return;
        }
    };

    if let Err(e) = result {
        warn!(error = %e, name, "Failed to apply invalidation");
    }
}
