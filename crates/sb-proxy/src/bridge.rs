//! STDIO front end
//!
//! Serves one proxy over standard input/output so MCP clients that only
//! speak the stdio transport (Claude Desktop, editors) can use it directly.
//! Requests are newline-delimited JSON-RPC; all logging goes to stderr so
//! stdout stays pure protocol.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use sb_types::AppResult;

use crate::core::ProxyCore;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};
use crate::store::ProxyStore;

pub struct StdioBridge {
    core: Arc<ProxyCore>,
    stdin: BufReader<tokio::io::Stdin>,
    stdout: tokio::io::Stdout,
}

impl StdioBridge {
    /// Open the named proxy and attach it to this process's stdio
    pub async fn new(store: &ProxyStore, proxy_id: &str) -> AppResult<Self> {
        let core = store.get(proxy_id).await?;
        info!("Bridge serving proxy '{}' over stdio", proxy_id);
        Ok(Self {
            core,
            stdin: BufReader::new(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
        })
    }

    /// Read requests until EOF or a termination signal, then close the proxy
    ///
    /// Closing on signal matters: upstream subprocesses must not outlive
    /// this process.
    pub async fn run(mut self) -> AppResult<()> {
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                read = self.stdin.read_line(&mut line) => read,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received ctrl-c, shutting down bridge");
                    break;
                }
            };
            match read {
                Ok(0) => {
                    debug!("EOF on stdin, shutting down bridge");
                    break;
                }
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcRequest>(&line) {
                        Ok(request) => {
                            debug!("Bridge request: method={}", request.method);
                            if let Some(response) = self.core.handle_request(request).await {
                                self.write_response(&response).await?;
                            }
                        }
                        Err(e) => {
                            warn!("Unparseable request on stdin: {}", e);
                            let response = JsonRpcResponse::error(
                                Value::Null,
                                PARSE_ERROR,
                                format!("Parse error: {}", e),
                            );
                            self.write_response(&response).await?;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }

        self.core.close().await?;
        Ok(())
    }

    async fn write_response(&mut self, response: &JsonRpcResponse) -> AppResult<()> {
        let json = serde_json::to_string(response)?;
        self.stdout.write_all(json.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;
        Ok(())
    }
}
