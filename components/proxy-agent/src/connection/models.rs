// Local crates
use crate::connection::backoff::BackoffPolicy;

// External crates
use std::time::Duration;

/// Reachability states. `Connecting` is a transition, not a durable state:
/// a probe is always in flight toward one of these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
    Offline,
}

impl ConnectionState {
    /// Wire form used in response envelopes and the connection log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
        }
    }
}

/// Lifecycle events observable by the Dispatcher and the
/// InvalidationListener.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChange {
        from: ConnectionState,
        to: ConnectionState,
    },
    Connected {
        latency_ms: u64,
    },
    Disconnected {
        error: String,
    },
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    MaxAttemptsReached,
}

/// Consistent snapshot handed to observers: the state plus the connection
/// epoch, which increments every time the supervisor re-enters Connected.
/// Failure reports carrying a stale epoch are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: ConnectionState,
    pub epoch: u64,
}

/// Supervisor tuning knobs.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Periodic probe interval while Connected.
    pub probe_interval: Duration,
    /// Per-probe cancellation budget.
    pub probe_timeout: Duration,
    /// Consecutive probe failures tolerated before going Offline.
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            backoff: BackoffPolicy::default(),
        }
    }
}
