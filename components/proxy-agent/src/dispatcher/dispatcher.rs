//! Dispatcher - responsibility and behavior
//!
//! The Dispatcher fuses the static tool catalog, the CacheEngine, the
//! WriteQueue, the UpstreamClient and the ConnectionSupervisor to serve
//! every tool call with a uniform, metadata-annotated envelope.
//!
//! Routing is a tagged dispatch over the catalog:
//! - cacheable reads are answered from the cache, falling through to a
//! live fetch (which re-primes the cache) only while Connected;
//! - writes land in the cache first, then either go upstream or into the
//! durable write queue;
//! - everything else passes through verbatim and requires Connected.
//!
//! No error escapes this boundary: every call terminates with a
//! well-formed envelope whose `_metadata.status` reflects the supervisor's
//! current state.

// Local crates
use crate::cache::engine::CacheEngine;
use crate::connection::models::ConnectionEvent;
use crate::connection::supervisor::{ConnectionSupervisor, SupervisorError};
use crate::dispatcher::catalog::{self, ToolRoute};
use crate::dispatcher::envelope::{
    Envelope, ErrorBody, ErrorCode, Source, offline_suggestions, unavailable_suggestions,
};
use crate::queue::models::QueueOperation;
use crate::queue::write_queue::WriteQueue;
use crate::upstream::client::UpstreamClient;

// External crates
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const QUEUED_WARNING: &str = "Operation queued — will sync when connection restored";

#[derive(Debug, Deserialize)]
struct DocumentKey {
    #[serde(rename = "docType")]
    doc_type: String,
    name: String,
    #[serde(default)]
    project: String,
}

#[derive(Debug, Deserialize)]
struct NamedKey {
    name: String,
    #[serde(default)]
    project: String,
}

#[derive(Debug, Deserialize)]
struct DocumentWrite {
    #[serde(rename = "docType")]
    doc_type: String,
    name: String,
    content: String,
    #[serde(default)]
    project: String,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MemoryWrite {
    name: String,
    content: String,
    #[serde(default)]
    project: String,
    metadata: Option<Value>,
}

/// Request router. Shared behind an `Arc` between the front-side server
/// and the connection-event loop.
#[derive(Debug)]
pub struct Dispatcher {
    cache: CacheEngine,
    queue: WriteQueue,
    supervisor: Arc<ConnectionSupervisor>,
    upstream: Arc<dyn UpstreamClient>,
    preload: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        cache: CacheEngine,
        queue: WriteQueue,
        supervisor: Arc<ConnectionSupervisor>,
        upstream: Arc<dyn UpstreamClient>,
        preload: Vec<String>,
    ) -> Self {
        Self {
            cache,
            queue,
            supervisor,
            upstream,
            preload,
        }
    }

    /// The static catalog, identical in every connection state.
    pub fn list_tools(&self) -> Value {
        catalog::catalog_json()
    }

    /// Serve one tool invocation. Never fails; all errors become
    /// envelopes.
    pub async fn handle_call(&self, tool: &str, args: Value) -> Envelope {
        debug!(tool, "Dispatching tool call");
        match catalog::route_for(tool) {
            ToolRoute::CacheableRead => self.handle_read(tool, args).await,
            ToolRoute::Write => self.handle_write(tool, args).await,
            ToolRoute::PassThrough => self.handle_passthrough(tool, args).await,
        }
    }

    /// Subscribe to supervisor lifecycle events and, on every transition
    /// into Connected, fire the write-queue replay and the preload sweep
    /// as background tasks.
    pub fn spawn_event_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let mut events = self.supervisor.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Ok(ConnectionEvent::Connected { latency_ms }) => {
                            info!(latency_ms, "Upstream connected, starting sync");

                            let queue = dispatcher.queue.clone();
                            tokio::spawn(async move {
                                if let Err(e) = queue.replay().await {
                                    warn!(error = %e, "Write-queue replay failed");
                                }
                            });

                            let preloader = dispatcher.clone();
                            tokio::spawn(async move { preloader.preload_sweep().await });
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Connection event loop lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        })
    }

    // ------------------------- read path -------------------------

    async fn handle_read(&self, tool: &str, args: Value) -> Envelope {
        match tool {
            "get_memory" => {
                let key: NamedKey = match self.parse_args(args.clone()) {
                    Ok(key) => key,
                    Err(envelope) => return *envelope,
                };
                self.read_memory(key, args).await
            }
            _ => {
                let key = if tool == "get_workflow" {
                    match self.parse_args::<NamedKey>(args.clone()) {
                        Ok(key) => DocumentKey {
                            doc_type: "workflow".to_owned(),
                            name: key.name,
                            project: key.project,
                        },
                        Err(envelope) => return *envelope,
                    }
                } else {
                    match self.parse_args(args.clone()) {
                        Ok(key) => key,
                        Err(envelope) => return *envelope,
                    }
                };
                self.read_document(tool, key, args).await
            }
        }
    }

    async fn read_document(&self, tool: &str, key: DocumentKey, args: Value) -> Envelope {
        match self
            .cache
            .get_document(&key.doc_type, &key.name, &key.project)
            .await
        {
            Ok(Some(row)) => {
                let data = json!({
                    "docType": row.doc_type,
                    "name": row.name,
                    "project": row.project,
                    "content": String::from_utf8_lossy(&row.content),
                    "metadata": parse_metadata(row.metadata.as_deref()),
                });
                Envelope::success(data, Source::Cache, self.supervisor.state())
                    .with_age(row.age_seconds)
            }
            Ok(None) => match self.fetch_and_cache_document(tool, &key, args).await {
                Ok(envelope) => envelope,
                Err(_) => self.unavailable(tool, &key.name),
            },
            Err(e) => self.store_failure(e),
        }
    }

    async fn fetch_and_cache_document(
        &self,
        tool: &str,
        key: &DocumentKey,
        args: Value,
    ) -> Result<Envelope, SupervisorError> {
        let value = self
            .supervisor
            .execute(|| self.upstream.invoke(tool, args))
            .await?;

        let (content, metadata) = cacheable_payload(&value);
        if let Some(content) = &content {
            if let Err(e) = self
                .cache
                .set_document(
                    &key.doc_type,
                    &key.name,
                    content.clone().into_bytes(),
                    &key.project,
                    metadata.clone(),
                )
                .await
            {
                return Ok(self.store_failure(e));
            }
        }

        let data = json!({
            "docType": key.doc_type,
            "name": key.name,
            "project": key.project,
            "content": content.unwrap_or_default(),
            "metadata": parse_metadata(metadata.as_deref()),
        });
        Ok(Envelope::success(data, Source::Live, self.supervisor.state()))
    }

    async fn read_memory(&self, key: NamedKey, args: Value) -> Envelope {
        match self.cache.get_memory(&key.name, &key.project).await {
            Ok(Some(row)) => {
                let data = json!({
                    "name": row.name,
                    "project": row.project,
                    "content": String::from_utf8_lossy(&row.content),
                    "metadata": parse_metadata(row.metadata.as_deref()),
                });
                Envelope::success(data, Source::Cache, self.supervisor.state())
                    .with_age(row.age_seconds)
            }
            Ok(None) => match self.fetch_and_cache_memory(&key, args).await {
                Ok(envelope) => envelope,
                Err(_) => self.unavailable("get_memory", &key.name),
            },
            Err(e) => self.store_failure(e),
        }
    }

    async fn fetch_and_cache_memory(
        &self,
        key: &NamedKey,
        args: Value,
    ) -> Result<Envelope, SupervisorError> {
        let value = self
            .supervisor
            .execute(|| self.upstream.invoke("get_memory", args))
            .await?;

        let (content, metadata) = cacheable_payload(&value);
        if let Some(content) = &content {
            if let Err(e) = self
                .cache
                .set_memory(
                    &key.name,
                    content.clone().into_bytes(),
                    &key.project,
                    metadata.clone(),
                )
                .await
            {
                return Ok(self.store_failure(e));
            }
        }

        let data = json!({
            "name": key.name,
            "project": key.project,
            "content": content.unwrap_or_default(),
            "metadata": parse_metadata(metadata.as_deref()),
        });
        Ok(Envelope::success(data, Source::Live, self.supervisor.state()))
    }

    // ------------------------- write path -------------------------

    async fn handle_write(&self, tool: &str, args: Value) -> Envelope {
        // Apply locally first, so the local view stays authoritative even
        // when the upstream write gets queued.
        let applied = match tool {
            "create_document" | "update_document" => {
                match self.parse_args::<DocumentWrite>(args.clone()) {
                    Ok(write) => {
                        self.cache
                            .set_document(
                                &write.doc_type,
                                &write.name,
                                write.content.into_bytes(),
                                &write.project,
                                write.metadata.map(|m| m.to_string()),
                            )
                            .await
                    }
                    Err(envelope) => return *envelope,
                }
            }
            "set_memory" | "update_memory" => {
                match self.parse_args::<MemoryWrite>(args.clone()) {
                    Ok(write) => {
                        self.cache
                            .set_memory(
                                &write.name,
                                write.content.into_bytes(),
                                &write.project,
                                write.metadata.map(|m| m.to_string()),
                            )
                            .await
                    }
                    Err(envelope) => return *envelope,
                }
            }
            "delete_document" => match self.parse_args::<DocumentKey>(args.clone()) {
                Ok(key) => {
                    self.cache
                        .invalidate_document(&key.doc_type, &key.name, &key.project)
                        .await
                }
                Err(envelope) => return *envelope,
            },
            "delete_memory" => match self.parse_args::<NamedKey>(args.clone()) {
                Ok(key) => self.cache.invalidate_memory(&key.name, &key.project).await,
                Err(envelope) => return *envelope,
            },
            _ => return self.tool_failure(format!("unroutable write tool {tool}")),
        };

        if let Err(e) = applied {
            return self.store_failure(e);
        }

        // Forward while Connected; queue on any failure to reach upstream.
        match self
            .supervisor
            .execute(|| self.upstream.invoke(tool, args.clone()))
            .await
        {
            Ok(_) => Envelope::success(
                json!({"success": true}),
                Source::Live,
                self.supervisor.state(),
            ),
            Err(e) => {
                debug!(tool, error = %e, "Upstream unreachable, queueing mutation");
                self.enqueue(tool, &args).await
            }
        }
    }

    async fn enqueue(&self, tool: &str, args: &Value) -> Envelope {
        let Some(operation) = QueueOperation::parse(tool) else {
            return self.tool_failure(format!("{tool} cannot be queued"));
        };

        match self.queue.enqueue(operation, args).await {
            Ok(_) => Envelope::success(
                json!({"success": true, "queued": true}),
                Source::Cache,
                self.supervisor.state(),
            )
            .with_warning(QUEUED_WARNING),
            Err(e) => self.store_failure(e),
        }
    }

    // ------------------------- pass-through -------------------------

    async fn handle_passthrough(&self, tool: &str, args: Value) -> Envelope {
        match self
            .supervisor
            .execute(|| self.upstream.invoke(tool, args))
            .await
        {
            Ok(value) => Envelope::success(value, Source::Live, self.supervisor.state()),
            Err(SupervisorError::NotConnected(state)) => Envelope::failure(
                ErrorBody {
                    code: ErrorCode::Offline,
                    message: format!("{tool} requires a live upstream connection"),
                    suggestions: offline_suggestions(),
                },
                Source::Cache,
                state,
            ),
            Err(SupervisorError::Upstream(e)) => self.tool_failure(e.to_string()),
        }
    }

    // ------------------------- preload -------------------------

    /// Fetch the configured critical document kinds and bulk-insert them,
    /// so a fresh reconnect leaves the cache warm for the next outage.
    async fn preload_sweep(&self) {
        for kind in &self.preload {
            let fetched = self
                .supervisor
                .execute(|| {
                    self.upstream
                        .invoke("list_documents", json!({"docType": kind}))
                })
                .await;

            let value = match fetched {
                Ok(value) => value,
                Err(e) => {
                    warn!(kind, error = %e, "Preload fetch failed");
                    continue;
                }
            };

            let entries = value
                .get("documents")
                .and_then(Value::as_array)
                .cloned()
                .or_else(|| value.as_array().cloned())
                .unwrap_or_default();

            let mut loaded = 0usize;
            for entry in entries {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let Some(content) = entry.get("content").and_then(Value::as_str) else {
                    continue;
                };
                let doc_type = entry
                    .get("docType")
                    .and_then(Value::as_str)
                    .unwrap_or(kind);
                let project = entry
                    .get("project")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let metadata = entry
                    .get("metadata")
                    .filter(|m| !m.is_null())
                    .map(|m| m.to_string());

                if let Err(e) = self
                    .cache
                    .set_document(
                        doc_type,
                        name,
                        content.as_bytes().to_vec(),
                        project,
                        metadata,
                    )
                    .await
                {
                    warn!(name, error = %e, "Failed to preload document");
                } else {
                    loaded += 1;
                }
            }
            info!(kind, loaded, "Preload sweep finished");
        }
    }

    // ------------------------- envelope helpers -------------------------

    /// Boxed so argument-parsing call sites stay small.
    fn parse_args<T: serde::de::DeserializeOwned>(
        &self,
        args: Value,
    ) -> Result<T, Box<Envelope>> {
        serde_json::from_value(args)
            .map_err(|e| Box::new(self.tool_failure(format!("invalid arguments: {e}"))))
    }

    fn unavailable(&self, tool: &str, name: &str) -> Envelope {
        Envelope::failure(
            ErrorBody {
                code: ErrorCode::Unavailable,
                message: format!("{name} is not cached and the upstream is unreachable"),
                suggestions: unavailable_suggestions(tool),
            },
            Source::Cache,
            self.supervisor.state(),
        )
    }

    fn tool_failure(&self, message: String) -> Envelope {
        Envelope::failure(
            ErrorBody {
                code: ErrorCode::ToolError,
                message,
                suggestions: Vec::new(),
            },
            Source::Live,
            self.supervisor.state(),
        )
    }

    fn store_failure(&self, error: crate::store::store::StoreError) -> Envelope {
        // Store failures surface as TOOL_ERROR with the underlying
        // message, never raw.
        self.tool_failure(error.to_string())
    }
}

/// Extract the cacheable parts of an upstream fetch result: a string
/// `content` field (or a bare string body) plus an optional metadata map.
fn cacheable_payload(value: &Value) -> (Option<String>, Option<String>) {
    if let Some(content) = value.get("content").and_then(Value::as_str) {
        let metadata = value
            .get("metadata")
            .filter(|m| !m.is_null())
            .map(|m| m.to_string());
        (Some(content.to_owned()), metadata)
    } else if let Some(content) = value.as_str() {
        (Some(content.to_owned()), None)
    } else {
        (None, None)
    }
}

fn parse_metadata(metadata: Option<&str>) -> Value {
    metadata
        .and_then(|m| serde_json::from_str(m).ok())
        .unwrap_or(Value::Null)
}
