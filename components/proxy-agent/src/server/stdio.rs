//! Thin front-side loop: JSON line-delimited request/response over the
//! process's standard streams.
//!
//! One request per line, `{"id"?, "tool", "arguments"?}` in, the
//! dispatcher's envelope (with the echoed `id`) out. The full front-side
//! protocol server is an external collaborator; this loop exists so the
//! binary is drivable end-to-end.

// Local crates
use crate::dispatcher::dispatcher::Dispatcher;

// External crates
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct FrontRequest {
    id: Option<Value>,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

/// Serve requests from stdin until EOF or cancellation.
pub async fn serve(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Front-side stdin closed");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<FrontRequest>(&line) {
            Ok(request) => {
                let mut response = if request.tool == "list_tools" {
                    // The catalog is static and never gated on state.
                    json!({"data": dispatcher.list_tools()})
                } else {
                    let envelope = dispatcher
                        .handle_call(&request.tool, request.arguments)
                        .await;
                    serde_json::to_value(&envelope)?
                };
                if let Some(id) = request.id {
                    response["id"] = id;
                }
                response
            }
            Err(e) => {
                warn!(error = %e, "Dropping unparseable front-side request");
                json!({"error": {"code": "TOOL_ERROR", "message": format!("invalid request: {e}")}})
            }
        };

        stdout
            .write_all(format!("{response}\n").as_bytes())
            .await?;
        stdout.flush().await?;
    }
}
