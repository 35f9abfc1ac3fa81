//! STDIO transport: a child process speaking newline-delimited JSON-RPC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use sb_types::{AppError, AppResult};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;

/// Transport over a spawned child process.
///
/// Requests are written to the child's stdin as single lines; a reader task
/// matches responses back to callers by request id. Outgoing ids are rewritten
/// to a process-local counter so concurrent callers never collide, and the
/// caller's original id is restored on the response.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    pending: Arc<DashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Spawn the command and start the stdout reader task
    pub async fn spawn(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> AppResult<Self> {
        debug!("Spawning STDIO server: {} {:?}", command, args);

        let mut child = tokio::process::Command::new(&command)
            .args(&args)
            .envs(&env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    AppError::Connection(format!("Command not found: {}", command))
                }
                _ => AppError::Connection(format!("Failed to spawn {}: {}", command, e)),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Connection("Child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Connection("Child stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        let pending: Arc<DashMap<u64, oneshot::Sender<JsonRpcResponse>>> = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));

        // Reader task: route responses to pending callers until EOF
        let pending_reader = pending.clone();
        let alive_reader = alive.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => Self::dispatch_line(&pending_reader, value),
                    Err(e) => warn!("Unparseable line from STDIO server: {}", e),
                }
            }
            debug!("STDIO server stdout closed");
            alive_reader.store(false, Ordering::SeqCst);
            // Wake up anyone still waiting
            pending_reader.clear();
        });

        // Forward child stderr to our logs
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[upstream stderr] {}", line);
                }
            });
        }

        Ok(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            alive,
        })
    }

    fn dispatch_line(pending: &DashMap<u64, oneshot::Sender<JsonRpcResponse>>, value: Value) {
        let is_response = value.get("result").is_some() || value.get("error").is_some();
        if is_response {
            let Some(id) = value.get("id").and_then(Value::as_u64) else {
                warn!("Response with non-numeric id from STDIO server");
                return;
            };
            match serde_json::from_value::<JsonRpcResponse>(value) {
                Ok(response) => {
                    if let Some((_, tx)) = pending.remove(&id) {
                        let _ = tx.send(response);
                    } else {
                        trace!("No pending request for response id {}", id);
                    }
                }
                Err(e) => warn!("Malformed response from STDIO server: {}", e),
            }
        } else if let Some(method) = value.get("method").and_then(Value::as_str) {
            // Upstream notifications are not forwarded to clients
            trace!("Notification from STDIO server: {}", method);
        }
    }

    async fn write_line(&self, json: String) -> AppResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&self, mut request: JsonRpcRequest) -> AppResult<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(AppError::Connection("STDIO server has exited".to_string()));
        }

        let original_id = request.id.clone().unwrap_or(Value::Null);
        let wire_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request.id = Some(Value::from(wire_id));

        let (tx, rx) = oneshot::channel();
        self.pending.insert(wire_id, tx);

        let json = serde_json::to_string(&request)?;
        if let Err(e) = self.write_line(json).await {
            self.pending.remove(&wire_id);
            return Err(e);
        }

        // No timeout here: the server decides how long a request may take,
        // and the reader task fails the oneshot when the process dies.
        match rx.await {
            Ok(mut response) => {
                response.id = original_id;
                Ok(response)
            }
            Err(_) => {
                self.pending.remove(&wire_id);
                Err(AppError::Connection(
                    "STDIO server closed before responding".to_string(),
                ))
            }
        }
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> AppResult<()> {
        if !self.is_alive() {
            return Err(AppError::Connection("STDIO server has exited".to_string()));
        }
        let json = serde_json::to_string(&notification)?;
        self.write_line(json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> AppResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("Failed to kill STDIO server (already gone?): {}", e);
            }
        }
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let result = StdioTransport::spawn(
            "this-command-definitely-does-not-exist-12345".to_string(),
            vec![],
            HashMap::new(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Connection(_))));
    }

    #[tokio::test]
    async fn test_request_against_cat_echo_server() {
        // cat echoes stdin back verbatim, so any request line comes back as-is.
        // The transport rewrites the outgoing id to 1, so the echoed line looks
        // like a response to wire id 1 once we give it a result field.
        // Use a tiny shell echo server that wraps input into a response instead.
        let script = r#"while read line; do id=$(echo "$line" | sed 's/.*"id":\([0-9]*\).*/\1/'); echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"ok\":true}}"; done"#;
        let transport = StdioTransport::spawn(
            "sh".to_string(),
            vec!["-c".to_string(), script.to_string()],
            HashMap::new(),
        )
        .await
        .unwrap();

        let request = JsonRpcRequest::new(json!("client-7"), "ping", None);
        let response = transport.send_request(request).await.unwrap();

        // Original caller id is restored even though the wire id differed
        assert_eq!(response.id, json!("client-7"));
        assert_eq!(response.result.unwrap()["ok"], json!(true));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = StdioTransport::spawn(
            "cat".to_string(),
            vec![],
            HashMap::new(),
        )
        .await
        .unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_alive());

        let request = JsonRpcRequest::new(1, "ping", None);
        assert!(transport.send_request(request).await.is_err());
    }
}
