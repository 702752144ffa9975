use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    pub static ref CACHE_HITS: Counter = register_counter!(
        "bifrost_cache_hits_total",
        "Total number of cache lookups answered locally"
    )
    .unwrap();
    pub static ref CACHE_MISSES: Counter = register_counter!(
        "bifrost_cache_misses_total",
        "Total number of cache lookups that found no row"
    )
    .unwrap();
    pub static ref CACHE_EVICTIONS: Counter = register_counter!(
        "bifrost_cache_evictions_total",
        "Total number of dynamic-tier rows removed by LRU eviction"
    )
    .unwrap();
    pub static ref CACHE_DYNAMIC_BYTES: Gauge = register_gauge!(
        "bifrost_cache_dynamic_bytes",
        "Current byte size of the dynamic cache tier"
    )
    .unwrap();
    pub static ref QUEUE_PENDING: Gauge = register_gauge!(
        "bifrost_queue_pending",
        "Number of write-queue rows waiting for replay"
    )
    .unwrap();
    pub static ref QUEUE_REPLAYED: Counter = register_counter!(
        "bifrost_queue_replayed_total",
        "Total number of queued mutations successfully replayed upstream"
    )
    .unwrap();
    pub static ref QUEUE_TERMINAL_FAILURES: Counter = register_counter!(
        "bifrost_queue_terminal_failures_total",
        "Total number of queued mutations that exhausted their retry budget"
    )
    .unwrap();
    pub static ref RECONNECT_ATTEMPTS: Counter = register_counter!(
        "bifrost_reconnect_attempts_total",
        "Total number of reconnection probes issued while not connected"
    )
    .unwrap();
    pub static ref PROBE_LATENCY: Histogram = register_histogram!(
        "bifrost_probe_latency_ms",
        "Histogram of successful upstream probe latencies in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap();
}
