use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Main entrypoint simply delegates control to the CLI layer.
    // The CLI parses user commands and then calls into the appropriate logic
    proxy_agent::cli::cli::run().await
}
