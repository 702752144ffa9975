use std::panic;
use std::path::Path;
use tracing::error;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, registry::Registry};

/// Initialize the tracing registry: env-filtered, JSON-formatted rolling
/// file output under `log_dir`.
///
/// Everything goes to the log file rather than stdout, because stdout
/// carries the front-side line protocol. The returned guard must be held
/// for the life of the process or buffered log lines are lost.
pub fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let file_appender = rolling::daily(log_dir, "bifrost.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let error_layer = ErrorLayer::default();

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(error_layer);

    // A second initialization (tests, embedded runtimes) keeps the
    // existing global subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => "Unknown panic",
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Application panicked!"
        );
    }));
}
