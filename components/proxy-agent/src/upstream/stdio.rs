//! Child-process transport: a locally spawned upstream speaking JSON
//! line-delimited request/response RPC over its standard streams.
//!
//! Wire shape, one JSON object per line:
//! - request:  `{"id": <u64>, "tool": <name>, "arguments": <args>}`
//! - response: `{"id": <u64>, "result": <value>}` or
//!             `{"id": <u64>, "error": <message>}`
//!
//! A single background worker owns the child's stdin and stdout and a map
//! of in-flight correlation ids, so callers never contend on the pipes.

// Local crates
use crate::upstream::client::{UpstreamClient, UpstreamError};

// External crates
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct RpcRequest {
    tool: String,
    args: Value,
    reply: oneshot::Sender<Result<Value, UpstreamError>>,
}

/// Upstream client over a spawned child process.
#[derive(Debug)]
pub struct StdioUpstream {
    requests: mpsc::Sender<RpcRequest>,
}

impl std::fmt::Debug for RpcRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRequest").field("tool", &self.tool).finish()
    }
}

impl StdioUpstream {
    /// Spawn `command args...` and start the RPC worker over its pipes.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self, UpstreamError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpstreamError::Transport(format!("failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| UpstreamError::Transport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UpstreamError::Transport("child stdout unavailable".into()))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(run_worker(child, stdin, stdout, rx));

        Ok(Self { requests: tx })
    }
}

#[async_trait]
impl UpstreamClient for StdioUpstream {
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value, UpstreamError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(RpcRequest {
                tool: tool.to_owned(),
                args,
                reply: reply_tx,
            })
            .await
            .map_err(|_| UpstreamError::Closed)?;

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(UpstreamError::Closed),
            Err(_) => Err(UpstreamError::Timeout(REQUEST_TIMEOUT)),
        }
    }

    async fn probe(&self) -> Result<Duration, UpstreamError> {
        let started = Instant::now();
        match self.invoke("ping", json!({})).await {
            // Any answer over the pipe, even a tool error, proves the
            // child is alive and responding.
            Ok(_) | Err(UpstreamError::Tool(_)) => Ok(started.elapsed()),
            Err(e) => Err(e),
        }
    }
}

/// Background worker: writes requests, reads response lines, completes
/// in-flight correlation ids. Exits when the request channel closes or the
/// child's stdout reaches EOF.
async fn run_worker(
    mut child: tokio::process::Child,
    mut stdin: tokio::process::ChildStdin,
    stdout: tokio::process::ChildStdout,
    mut requests: mpsc::Receiver<RpcRequest>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut pending: HashMap<u64, oneshot::Sender<Result<Value, UpstreamError>>> = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    debug!("Child-process RPC request channel closed, stopping worker");
                    break;
                };

                next_id += 1;
                let id = next_id;
                let line = json!({
                    "id": id,
                    "tool": request.tool,
                    "arguments": request.args,
                })
                .to_string();

                match stdin.write_all(format!("{line}\n").as_bytes()).await {
                    Ok(()) => {
                        pending.insert(id, request.reply);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed writing to upstream child stdin");
                        let _ = request
                            .reply
                            .send(Err(UpstreamError::Transport(e.to_string())));
                        break;
                    }
                }
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_response_line(&line, &mut pending),
                    Ok(None) => {
                        warn!("Upstream child closed its stdout");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed reading from upstream child stdout");
                        break;
                    }
                }
            }
        }
    }

    // Fail whatever is still in flight, then reap the child.
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(UpstreamError::Closed));
    }
    let _ = child.kill().await;
}

fn handle_response_line(
    line: &str,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Value, UpstreamError>>>,
) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Dropping unparseable line from upstream child");
            return;
        }
    };

    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        warn!("Dropping upstream child response without correlation id");
        return;
    };
    let Some(reply) = pending.remove(&id) else {
        warn!(id, "Dropping upstream child response for unknown request");
        return;
    };

    let result = match value.get("error") {
        Some(error) => {
            let message = error
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            Err(UpstreamError::Tool(message))
        }
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = reply.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_lines_complete_matching_requests() {
        let mut pending = HashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(7, tx);

        handle_response_line(r#"{"id": 7, "result": {"ok": true}}"#, &mut pending);

        assert!(pending.is_empty());
        let result = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(result, json!({"ok": true}));
    }

    #[test]
    fn error_responses_surface_as_tool_errors() {
        let mut pending = HashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(1, tx);

        handle_response_line(r#"{"id": 1, "error": "no such tool"}"#, &mut pending);

        match rx.blocking_recv().unwrap() {
            Err(UpstreamError::Tool(message)) => assert_eq!(message, "no such tool"),
            other => panic!("expected tool error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_and_unknown_ids_are_dropped() {
        let mut pending: HashMap<u64, oneshot::Sender<Result<Value, UpstreamError>>> =
            HashMap::new();
        handle_response_line("not json", &mut pending);
        handle_response_line(r#"{"id": 99, "result": 1}"#, &mut pending);
        handle_response_line(r#"{"result": 1}"#, &mut pending);
    }
}
