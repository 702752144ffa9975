//! Shared fixtures: a scripted upstream double and a fully wired
//! dispatcher harness over a throwaway store.

use async_trait::async_trait;
use proxy_agent::cache::engine::CacheEngine;
use proxy_agent::connection::backoff::BackoffPolicy;
use proxy_agent::connection::models::{ConnectionEvent, SupervisorConfig};
use proxy_agent::connection::supervisor::ConnectionSupervisor;
use proxy_agent::dispatcher::dispatcher::Dispatcher;
use proxy_agent::queue::write_queue::WriteQueue;
use proxy_agent::store::store::Store;
use proxy_agent::upstream::client::{UpstreamClient, UpstreamError};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Upstream double: records every invocation, answers from a scripted
/// response table, and can be flipped unreachable.
#[derive(Debug, Default)]
pub struct MockUpstream {
    pub reachable: AtomicBool,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub responses: Mutex<HashMap<String, Value>>,
}

impl MockUpstream {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn respond_with(&self, tool: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(tool.to_owned(), response);
    }

    pub fn calls_for(&self, tool: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, UpstreamError> {
        if !self.reachable.load(Ordering::Acquire) {
            return Err(UpstreamError::Transport("mock upstream unreachable".into()));
        }
        self.calls.lock().unwrap().push((tool.to_owned(), args));
        match self.responses.lock().unwrap().get(tool) {
            Some(response) => Ok(response.clone()),
            None => Ok(json!({"success": true})),
        }
    }

    async fn probe(&self) -> Result<Duration, UpstreamError> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(Duration::from_millis(2))
        } else {
            Err(UpstreamError::Transport("mock probe refused".into()))
        }
    }
}

pub struct Harness {
    _dir: tempfile::TempDir,
    pub upstream: Arc<MockUpstream>,
    pub cache: CacheEngine,
    pub queue: WriteQueue,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub dispatcher: Arc<Dispatcher>,
    pub cancel: CancellationToken,
}

impl Harness {
    /// Wire everything over a temp store. The supervisor is not started;
    /// tests drive it to the state they need.
    pub fn new(preload: Vec<String>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_dir(dir.path()).unwrap();
        let cache = CacheEngine::new(store.clone(), 1 << 20);
        let upstream = Arc::new(MockUpstream::default());
        let queue = WriteQueue::new(store.clone(), upstream.clone(), 3);

        // Generous attempt budget so an unreachable upstream parks the
        // supervisor in Reconnecting instead of drifting Offline mid-test.
        let supervisor = Arc::new(ConnectionSupervisor::new(
            upstream.clone(),
            SupervisorConfig {
                probe_interval: Duration::from_millis(50),
                probe_timeout: Duration::from_millis(25),
                max_reconnect_attempts: 10_000,
                backoff: BackoffPolicy {
                    initial: Duration::from_millis(10),
                    multiplier: 2.0,
                    max: Duration::from_millis(40),
                },
            },
            Some(store),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            cache.clone(),
            queue.clone(),
            supervisor.clone(),
            upstream.clone(),
            preload,
        ));

        let cancel = CancellationToken::new();
        dispatcher.spawn_event_loop(cancel.clone());

        Self {
            _dir: dir,
            upstream,
            cache,
            queue,
            supervisor,
            dispatcher,
            cancel,
        }
    }

    /// Start the supervisor and block until the given event arrives.
    pub async fn wait_for_event<F>(&self, events: &mut broadcast::Receiver<ConnectionEvent>, mut predicate: F)
    where
        F: FnMut(&ConnectionEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let event = events.recv().await.unwrap();
                if predicate(&event) {
                    return;
                }
            }
        })
        .await
        .expect("timed out waiting for connection event");
    }

    /// Poll until the write queue drains or the timeout hits.
    pub async fn wait_for_drained_queue(&self) {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if self.queue.pending_count().await.unwrap() == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for queue replay");
    }
}
