//! ConnectionSupervisor - responsibility and behavior
//!
//! The supervisor maintains the authoritative view of upstream reachability
//! and drives the engine's event-driven sync behavior.
//!
//! Key responsibilities:
//! - Probe the upstream on start, then periodically while Connected.
//! - On failure, move to Reconnecting and reschedule probes with
//! exponential backoff; after the configured attempt budget, go Offline and
//! emit `MaxAttemptsReached` exactly once for the run.
//! - Publish lifecycle events on a broadcast channel and the current state
//! on a watch channel, so observers get a consistent snapshot cheaply.
//! - Gate upstream calls through `execute`, which only dispatches while
//! Connected and reports failures back into the state machine.
//!
//! Important design notes:
//! - All state mutations happen inside a single worker task (single-writer
//! principle); external callers only send commands, so check-and-execute
//! can never dispatch into a state that has already decided to reconnect.
//! - Failure reports carry the connection epoch they observed. A report
//! from a previous epoch is stale and ignored, otherwise a slow failing
//! call could knock down a connection that was re-established after it
//! started.
//! - Offline is terminal for the worker; `start()` spawns a fresh run when
//! the operator restarts the supervisor.

// Local crates
use crate::connection::models::{
    ConnectionEvent, ConnectionState, StateSnapshot, SupervisorConfig,
};
use crate::metrics::metrics::{PROBE_LATENCY, RECONNECT_ATTEMPTS};
use crate::store::store::Store;
use crate::upstream::client::{UpstreamClient, UpstreamError};

// External crates
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Supervisor error handling
/// - `NotConnected` gates dispatch without touching the upstream;
/// `Upstream` re-throws the transport failure after reporting it.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("upstream is {}", .0.as_str())]
    NotConnected(ConnectionState),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

enum Command {
    RecordFailure { epoch: u64, error: String },
    Stop,
}

/// Authoritative reachability state machine. Shared behind an `Arc`.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    upstream: Arc<dyn UpstreamClient>,
    config: SupervisorConfig,
    store: Option<Store>,
    state_tx: Arc<watch::Sender<StateSnapshot>>,
    state_rx: watch::Receiver<StateSnapshot>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    cmd_tx: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        config: SupervisorConfig,
        store: Option<Store>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(StateSnapshot {
            state: ConnectionState::Disconnected,
            epoch: 0,
        });
        let (events_tx, _) = broadcast::channel(64);

        Self {
            upstream,
            config,
            store,
            state_tx: Arc::new(state_tx),
            state_rx,
            events_tx,
            cmd_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the state-machine worker: immediate probe, then the periodic
    /// probe timer. Idempotent while a worker is running; after Offline it
    /// starts a fresh run.
    pub fn start(&self) {
        let mut worker_slot = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker_slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Supervisor already running, ignoring start");
            return;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        *self.cmd_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(cmd_tx);

        let worker = Worker {
            upstream: self.upstream.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            state_tx: self.state_tx.clone(),
            events: self.events_tx.clone(),
            cmd_rx,
            state: ConnectionState::Disconnected,
            attempts: 0,
            epoch: self.state_rx.borrow().epoch,
        };
        // Reset the published state for the new run.
        worker.publish();

        *worker_slot = Some(tokio::spawn(worker.run()));
        info!("Connection supervisor started");
    }

    /// Cancel all timers and transition to Offline. Idempotent.
    pub async fn stop(&self) {
        let cmd_tx = self.cmd_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(cmd_tx) = cmd_tx {
            let _ = cmd_tx.send(Command::Stop).await;
        }

        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Current state, as a cheap consistent snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// Run `op` if and only if the supervisor is currently Connected.
    ///
    /// A failing `op` reports into the state machine (tagged with the epoch
    /// it observed) and the error is re-thrown for the caller to convert.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, SupervisorError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, UpstreamError>> + Send,
        T: Send,
    {
        let snapshot = *self.state_rx.borrow();
        if snapshot.state != ConnectionState::Connected {
            return Err(SupervisorError::NotConnected(snapshot.state));
        }

        match op().await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.report_failure(snapshot.epoch, e.to_string()).await;
                Err(SupervisorError::Upstream(e))
            }
        }
    }

    /// Report an externally-observed upstream failure against the current
    /// epoch, triggering Connected -> Reconnecting.
    pub async fn record_failure(&self, error: &str) {
        let epoch = self.state_rx.borrow().epoch;
        self.report_failure(epoch, error.to_owned()).await;
    }

    async fn report_failure(&self, epoch: u64, error: String) {
        let cmd_tx = self
            .cmd_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(cmd_tx) = cmd_tx {
            let _ = cmd_tx
                .send(Command::RecordFailure { epoch, error })
                .await;
        }
    }
}

/// Single-writer owner of all state transitions.
struct Worker {
    upstream: Arc<dyn UpstreamClient>,
    config: SupervisorConfig,
    store: Option<Store>,
    state_tx: Arc<watch::Sender<StateSnapshot>>,
    events: broadcast::Sender<ConnectionEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
}

impl Worker {
    async fn run(mut self) {
        // Immediate probe on start; afterwards the deadline tracks either
        // the periodic interval or the current backoff delay.
        let mut deadline = Instant::now();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Stop) => {
                        self.transition(ConnectionState::Offline).await;
                        info!("Connection supervisor stopped");
                        return;
                    }
                    Some(Command::RecordFailure { epoch, error }) => {
                        if epoch == self.epoch && self.state == ConnectionState::Connected {
                            if let Some(next) = self.handle_failure(error).await {
                                deadline = Instant::now() + next;
                            } else {
                                return;
                            }
                        } else {
                            debug!(epoch, current = self.epoch, "Ignoring stale failure report");
                        }
                    }
                },

                _ = tokio::time::sleep_until(deadline) => {
                    match self.probe().await {
                        Ok(latency) => {
                            self.handle_success(latency).await;
                            deadline = Instant::now() + self.config.probe_interval;
                        }
                        Err(e) => {
                            if let Some(next) = self.handle_failure(e.to_string()).await {
                                deadline = Instant::now() + next;
                            } else {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn probe(&self) -> Result<Duration, UpstreamError> {
        if self.state != ConnectionState::Connected {
            RECONNECT_ATTEMPTS.inc();
        }
        tokio::time::timeout(self.config.probe_timeout, self.upstream.probe())
            .await
            .map_err(|_| UpstreamError::Timeout(self.config.probe_timeout))?
    }

    async fn handle_success(&mut self, latency: Duration) {
        self.attempts = 0;
        let latency_ms = latency.as_millis() as u64;
        PROBE_LATENCY.observe(latency_ms as f64);

        if self.state != ConnectionState::Connected {
            self.epoch += 1;
            self.transition(ConnectionState::Connected).await;
            self.emit(ConnectionEvent::Connected { latency_ms });
            if let Some(store) = &self.store {
                store
                    .log_connection_state("connected", Some(latency_ms), None)
                    .await;
            }
        }
    }

    /// One more consecutive failure. Returns the delay until the next
    /// probe, or `None` when the worker has gone Offline.
    async fn handle_failure(&mut self, error: String) -> Option<Duration> {
        let was_connected = self.state == ConnectionState::Connected;
        self.attempts += 1;

        if was_connected {
            self.emit(ConnectionEvent::Disconnected {
                error: error.clone(),
            });
            if let Some(store) = &self.store {
                store
                    .log_connection_state("disconnected", None, Some(error.clone()))
                    .await;
            }
        }

        if self.attempts >= self.config.max_reconnect_attempts {
            warn!(
                attempts = self.attempts,
                error, "Reconnect attempt budget exhausted, going offline"
            );
            self.transition(ConnectionState::Offline).await;
            self.emit(ConnectionEvent::MaxAttemptsReached);
            return None;
        }

        if self.state != ConnectionState::Reconnecting {
            self.transition(ConnectionState::Reconnecting).await;
        }

        let delay = self.config.backoff.delay(self.attempts - 1);
        debug!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            error,
            "Scheduling reconnect probe"
        );
        self.emit(ConnectionEvent::Reconnecting {
            attempt: self.attempts,
            delay_ms: delay.as_millis() as u64,
        });
        Some(delay)
    }

    async fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.publish();
        self.emit(ConnectionEvent::StateChange { from, to });

        if to == ConnectionState::Offline {
            if let Some(store) = &self.store {
                store.log_connection_state("offline", None, None).await;
            }
        }
    }

    fn publish(&self) {
        let _ = self.state_tx.send(StateSnapshot {
            state: self.state,
            epoch: self.epoch,
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        // Nobody listening is fine; broadcast only errors when empty.
        let _ = self.events.send(event);
    }
}
