//! Proxy agent runtime initialization and lifecycle.
//!
//! Wiring order (start is leaves-first, stop is LIFO):
//! config -> tracing -> store -> cache/queue -> upstream transport ->
//! connection supervisor -> dispatcher event loop -> invalidation listener
//! (event-stream mode) -> metrics endpoint -> front-side stdio loop.

// Local crates
use crate::cache::engine::CacheEngine;
use crate::connection::backoff::BackoffPolicy;
use crate::connection::models::SupervisorConfig;
use crate::connection::supervisor::ConnectionSupervisor;
use crate::dispatcher::dispatcher::Dispatcher;
use crate::helpers::load_config::{Config, UpstreamMode};
use crate::helpers::shutdown::Shutdown;
use crate::invalidation::listener::{DEFAULT_RECONNECT_DELAY, InvalidationListener};
use crate::metrics::http::start_metrics_server;
use crate::queue::write_queue::{DEFAULT_MAX_ATTEMPTS, WriteQueue};
use crate::server::stdio as front;
use crate::store::store::Store;
use crate::upstream::client::UpstreamClient;
use crate::upstream::http::HttpUpstream;
use crate::upstream::stdio::StdioUpstream;
use crate::upstream::stream::StreamUpstream;

// External crates
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Build the configured upstream transport. The `StreamUpstream` handle is
/// returned separately so shutdown can close its response channel.
fn build_upstream(
    config: &Config,
) -> Result<(Arc<dyn UpstreamClient>, Option<Arc<StreamUpstream>>)> {
    let upstream = &config.upstream;
    match upstream.mode {
        UpstreamMode::ChildProcess => {
            let command = upstream
                .command
                .as_deref()
                .context("upstream.command missing")?;
            let client = StdioUpstream::spawn(command, &upstream.args)
                .context("spawning upstream child process")?;
            Ok((Arc::new(client), None))
        }
        UpstreamMode::Http => {
            let url = upstream.url.as_deref().context("upstream.url missing")?;
            Ok((
                Arc::new(HttpUpstream::new(url, upstream.api_key.clone())),
                None,
            ))
        }
        UpstreamMode::EventStream => {
            let url = upstream.url.as_deref().context("upstream.url missing")?;
            let client = StreamUpstream::connect(url, upstream.api_key.clone());
            Ok((client.clone(), Some(client)))
        }
    }
}

fn supervisor_config(config: &Config) -> SupervisorConfig {
    let connection = &config.connection;
    SupervisorConfig {
        probe_interval: Duration::from_millis(connection.health_check_interval_ms),
        probe_timeout: Duration::from_millis(connection.probe_timeout_ms),
        max_reconnect_attempts: connection.max_reconnect_attempts,
        backoff: BackoffPolicy {
            initial: Duration::from_millis(connection.backoff.initial_ms),
            multiplier: connection.backoff.multiplier,
            max: Duration::from_millis(connection.backoff.max_ms),
        },
    }
}

/// Run the proxy agent until the front-side stream closes or the process
/// receives ctrl-c.
pub async fn run_proxy_agent(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;

    let _log_guard =
        crate::instrumentation::tracing::init_tracing(&config.cache.dir.join("logs"));
    crate::instrumentation::tracing::init_panic_handler();
    info!(config = %config_path.display(), "Starting proxy agent");

    // Persistence and the engines over it. A migration failure here is
    // fatal by design.
    let store = Store::open_in_dir(&config.cache.dir)?;
    let cache = CacheEngine::new(store.clone(), config.cache.max_dynamic_bytes);

    let (upstream, stream_handle) = build_upstream(&config)?;
    let queue = WriteQueue::new(store.clone(), upstream.clone(), DEFAULT_MAX_ATTEMPTS);

    let supervisor = Arc::new(ConnectionSupervisor::new(
        upstream.clone(),
        supervisor_config(&config),
        Some(store.clone()),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        cache.clone(),
        queue,
        supervisor.clone(),
        upstream,
        config.cache.preload.clone(),
    ));

    let cancel = CancellationToken::new();
    let shutdown = Shutdown::new();

    // Replay + preload fire on every Connected transition.
    let event_loop = dispatcher.spawn_event_loop(cancel.clone());
    supervisor.start();

    // Push invalidation rides the event-stream upstream's SSE surface.
    let listener = match (config.upstream.mode, config.upstream.url.as_deref()) {
        (UpstreamMode::EventStream, Some(url)) => {
            let listener = Arc::new(InvalidationListener::new(
                cache,
                url,
                config.upstream.api_key.clone(),
                DEFAULT_RECONNECT_DELAY,
            ));
            listener.start();
            Some(listener)
        }
        _ => None,
    };

    if config.metrics.enabled {
        let addr = config.metrics.addr.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&addr).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    // Serve the front side until it closes or the operator interrupts.
    let front_cancel = cancel.clone();
    let front_shutdown = shutdown.clone();
    let front_task = tokio::spawn(async move {
        if let Err(e) = front::serve(dispatcher, front_cancel).await {
            error!(error = %e, "Front-side loop failed");
        }
        front_shutdown.trigger();
    });

    tokio::select! {
        _ = signal::ctrl_c() => info!("Interrupt received, shutting down"),
        _ = shutdown.wait_for_shutdown() => {}
    }

    // Stop in LIFO order; each step is idempotent.
    cancel.cancel();
    if let Some(listener) = &listener {
        listener.stop().await;
    }
    supervisor.stop().await;
    if let Some(stream) = &stream_handle {
        stream.shutdown();
    }
    let _ = event_loop.await;
    front_task.abort();

    info!("Proxy agent stopped");
    Ok(())
}
