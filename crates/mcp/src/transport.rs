//! Stdio transport: spawn a child process and communicate via JSON-RPC over stdin/stdout.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Context, McpTransportError, Result},
    traits::McpTransport,
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// Stdio-based transport for an MCP server process.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    /// Set once stdout reaches EOF; every later request fails fast.
    closed: Arc<AtomicBool>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader loop.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        info!(command = %command, args = ?args, "spawning MCP server process");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn MCP server: {command}"))?;

        let stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        if let Some(stderr) = stderr {
            let command = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        warn!(command = %command, stderr = %trimmed, "MCP server stderr");
                    }
                }
            });
        }

        let handle = {
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            trace!(raw = %trimmed, "MCP server -> client");
                            dispatch_response(&pending, trimmed).await;
                        },
                        Ok(None) => {
                            debug!("MCP server stdout closed");
                            break;
                        },
                        Err(e) => {
                            warn!(error = %e, "error reading from MCP server stdout");
                            break;
                        },
                    }
                }
                closed.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with a closed error.
                pending.lock().await.clear();
            })
        };

        Ok(Arc::new(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            closed,
            reader_handle: Mutex::new(Some(handle)),
        }))
    }

    async fn write_line(&self, payload: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let written = async {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| {
            McpTransportError::Closed {
                reason: format!("write to server stdin failed: {e}"),
            }
            .into()
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpTransportError::Closed {
                reason: "server process exited".into(),
            }
            .into());
        }
        Ok(())
    }
}

/// Route one line from the server to whoever is waiting on its id.
/// Lines that are not responses (server notifications, logs) are ignored.
pub(crate) async fn dispatch_response(pending: &PendingMap, raw: &str) {
    match serde_json::from_str::<JsonRpcResponse>(raw) {
        Ok(resp) => {
            let key = resp.id.to_string();
            if let Some(tx) = pending.lock().await.remove(&key) {
                let _ = tx.send(resp);
            } else {
                debug!(id = %key, "received response for unknown request id");
            }
        },
        Err(e) => {
            debug!(error = %e, line = %raw, "MCP server sent non-response message");
        },
    }
}

/// Wait for the response to `id`, mapping the ways that can go wrong onto
/// typed transport errors.
pub(crate) async fn await_response(
    pending: &PendingMap,
    id_key: &str,
    method: &str,
    rx: oneshot::Receiver<JsonRpcResponse>,
    after: Duration,
) -> Result<JsonRpcResponse> {
    let resp = match tokio::time::timeout(after, rx).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(_)) => {
            return Err(McpTransportError::Closed {
                reason: format!("connection dropped while waiting for '{method}'"),
            }
            .into());
        },
        Err(_) => {
            pending.lock().await.remove(id_key);
            return Err(McpTransportError::Timeout {
                method: method.to_string(),
                after,
            }
            .into());
        },
    };
    check_rpc_error(method, resp)
}

pub(crate) fn check_rpc_error(method: &str, resp: JsonRpcResponse) -> Result<JsonRpcResponse> {
    if let Some(ref err) = resp.error {
        return Err(McpTransportError::Rpc {
            method: method.to_string(),
            code: err.code,
            message: err.message.clone(),
        }
        .into());
    }
    Ok(resp)
}

pub(crate) fn notification(method: &str, params: Option<Value>) -> JsonRpcNotification {
    JsonRpcNotification {
        jsonrpc: "2.0".into(),
        method: method.into(),
        params,
    }
}

#[async_trait::async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        self.ensure_open()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let id_key = req.id.to_string();
        let payload = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id_key.clone(), tx);

        debug!(method = %method, id = %id, "client -> MCP server");
        if let Err(e) = self.write_line(&payload).await {
            self.pending.lock().await.remove(&id_key);
            return Err(e);
        }

        await_response(&self.pending, &id_key, method, rx, self.request_timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_open()?;
        let payload = serde_json::to_string(&notification(method, params))?;
        trace!(method = %method, "client -> MCP server (notification)");
        self.write_line(&payload).await
    }

    async fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.clear();
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::error::Error};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_spawn_and_kill() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new(), TIMEOUT)
            .await
            .unwrap();
        assert!(transport.is_alive().await);
        transport.kill().await;
        assert!(!transport.is_alive().await);
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let result =
            StdioTransport::spawn("nonexistent_command_xyz_42", &[], &HashMap::new(), TIMEOUT)
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_request_after_exit_is_closed() {
        let transport = StdioTransport::spawn("true", &[], &HashMap::new(), TIMEOUT)
            .await
            .unwrap();
        // Wait for EOF on stdout.
        for _ in 0..50 {
            if !transport.is_alive().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.is_transport_closed(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_request_timeout_is_typed() {
        // `sleep` never answers and never closes stdout in time.
        let transport = StdioTransport::spawn(
            "sleep",
            &["5".into()],
            &HashMap::new(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::Timeout { .. })
        ));
        assert!(transport.pending.lock().await.is_empty());
        transport.kill().await;
    }

    #[tokio::test]
    async fn test_rpc_error_is_typed() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        let err = check_rpc_error("foo", resp).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::Rpc { code: -32601, .. })
        ));
    }
}
