//! Bifrost proxy agent: an offline-resilient sidecar between a
//! tool-calling client and a remote knowledge server.
//!
//! Reads of slowly-changing content are served from a persistent two-tier
//! cache even while disconnected; writes performed offline land in a
//! durable queue and replay on reconnect; the callable tool catalog stays
//! stable regardless of connection state.

pub mod cache;
pub mod cli;
pub mod connection;
pub mod dispatcher;
pub mod helpers;
pub mod instrumentation;
pub mod invalidation;
pub mod metrics;
pub mod queue;
pub mod runtime;
pub mod server;
pub mod store;
pub mod upstream;
