use crate::helpers::load_config::Config;
use crate::queue::write_queue::{DEFAULT_MAX_ATTEMPTS, WriteQueue};
use crate::runtime;
use crate::store::store::Store;
use crate::upstream::client::{UpstreamClient, UpstreamError};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "bifrost",
    about = "The Offline-Resilient Knowledge Proxy",
    long_about = "Bifrost is a local sidecar proxy that keeps knowledge-server tools usable \
    across network interruptions: reads come from a persistent cache, offline writes are \
    queued and replayed, and the tool catalog never shrinks.",
    version,
    term_width = 100,
    after_help = "\
    EXAMPLES:
        bifrost run --config /etc/bifrost.toml
        bifrost validate --config ./bifrost.toml
        bifrost queue failed --config ./bifrost.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy agent
    Run {
        #[arg(short, long, default_value = "/etc/bifrost.toml")]
        config: PathBuf,
    },

    /// Validate the configuration file before running
    Validate {
        #[arg(short, long, default_value = "/etc/bifrost.toml")]
        config: PathBuf,
    },

    /// Inspect and manage the offline write queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,

        #[arg(short, long, default_value = "/etc/bifrost.toml")]
        config: PathBuf,
    },

    /// Display version information
    Version,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show pending/failed/total counts
    Status,
    /// List rows that exhausted their retry budget
    Failed,
    /// Reset a failed row for another round of replay attempts
    Retry { id: i64 },
    /// Drop every failed row
    ClearFailed,
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => runtime::runtime::run_proxy_agent(config).await?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Queue { command, config } => queue_command(command, config).await?,
        Commands::Version => show_version(),
    }

    Ok(())
}

//
// ------------------------ Command Implementations ------------------------------
//

/// Validate configuration file
fn validate_config(config: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config);
    let cfg = Config::load(&config)?;
    println!("Configuration valid:\n{:#?}", cfg);
    Ok(())
}

/// Offline operator surface for the write queue. Uses a no-op upstream:
/// none of these subcommands replay anything.
async fn queue_command(command: QueueCommands, config: PathBuf) -> Result<()> {
    #[derive(Debug)]
    struct NoUpstream;

    #[async_trait::async_trait]
    impl UpstreamClient for NoUpstream {
        async fn invoke(
            &self,
            _tool: &str,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, UpstreamError> {
            Err(UpstreamError::Closed)
        }

        async fn probe(&self) -> Result<std::time::Duration, UpstreamError> {
            Err(UpstreamError::Closed)
        }
    }

    let cfg = Config::load(&config)?;
    let store = Store::open_in_dir(&cfg.cache.dir)?;
    let queue = WriteQueue::new(store, Arc::new(NoUpstream), DEFAULT_MAX_ATTEMPTS);

    match command {
        QueueCommands::Status => {
            let stats = queue.stats().await?;
            println!(
                "pending: {}\nfailed: {}\ntotal: {}",
                stats.pending, stats.failed, stats.total
            );
        }
        QueueCommands::Failed => {
            let failed = queue.list_failed().await?;
            if failed.is_empty() {
                println!("No failed queue rows");
            }
            for row in failed {
                println!(
                    "#{} {} attempts={} error={}",
                    row.id,
                    row.operation,
                    row.attempts,
                    row.last_error.as_deref().unwrap_or("-")
                );
            }
        }
        QueueCommands::Retry { id } => {
            if queue.retry(id).await? {
                println!("Queue row #{id} reset to pending");
            } else {
                println!("Queue row #{id} is not in the failed bucket");
            }
        }
        QueueCommands::ClearFailed => {
            let removed = queue.clear_failed().await?;
            println!("Removed {removed} failed queue rows");
        }
    }

    Ok(())
}

/// Show version information
fn show_version() {
    println!("Bifrost Proxy Agent {}", env!("CARGO_PKG_VERSION"));
}
