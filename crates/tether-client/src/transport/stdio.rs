//! Stdio transport: spawns a backend server as a child process and speaks
//! newline-delimited JSON-RPC over its stdin/stdout.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tether_types::{ClientError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::pending::RequestMap;

/// How long a closing transport waits for the child to exit on its own
/// before killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Async stdio transport for a subprocess-backed server.
pub struct StdioTransport {
    instance_id: Uuid,
    pending: Arc<RequestMap>,
    write_tx: std::sync::Mutex<Option<mpsc::Sender<String>>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    child: Arc<Mutex<Option<Child>>>,
    process_id: Option<u32>,
    closed: Arc<AtomicBool>,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn the child process and start background reader/writer tasks.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout_ms: u64,
    ) -> Result<Self, ClientError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ClientError::Spawn {
            name: command.to_string(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let process_id = child.id();

        let pending = Arc::new(RequestMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: reads lines from stdout, parses JSON-RPC, dispatches.
        // When the child exits the line stream ends and every pending
        // request is failed.
        let pending_for_reader = Arc::clone(&pending);
        let closed_for_reader = Arc::clone(&closed);
        let reader_handle = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let resp: JsonRpcResponse = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Failed to parse server message: {e}: {line}");
                        continue;
                    }
                };
                match resp.id {
                    Some(id) => {
                        if !pending_for_reader.complete(id, resp) {
                            tracing::warn!("Dropping response with unrecognized id {id}");
                        }
                    }
                    // Notifications from the server are currently ignored
                    None => {}
                }
            }
            closed_for_reader.store(true, Ordering::SeqCst);
            pending_for_reader
                .fail_all(|| ClientError::Transport("server process exited".to_string()));
        });

        Ok(Self {
            instance_id: Uuid::new_v4(),
            pending,
            write_tx: std::sync::Mutex::new(Some(write_tx)),
            reader_handle,
            writer_handle,
            child: Arc::new(Mutex::new(Some(child))),
            process_id,
            closed,
            timeout_ms,
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// OS pid of the child process, if it is still tracked.
    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    fn write_sender(&self) -> Result<mpsc::Sender<String>, ClientError> {
        self.write_tx
            .lock()
            .expect("write sender lock poisoned")
            .clone()
            .ok_or_else(|| ClientError::Transport("transport is closed".to_string()))
    }

    /// Send a JSON-RPC request and wait for the correlated response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("transport is closed".to_string()));
        }

        let pending = self.pending.register();
        let request = JsonRpcRequest::new(pending.id(), method, params);
        let serialized = serde_json::to_string(&request)?;

        self.write_sender()?
            .send(serialized)
            .await
            .map_err(|_| ClientError::Transport("writer channel closed".to_string()))?;

        pending
            .wait(method, Duration::from_millis(self.timeout_ms))
            .await
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("transport is closed".to_string()));
        }

        let notification = JsonRpcNotification::new(method, params);
        let serialized = serde_json::to_string(&notification)?;

        self.write_sender()?
            .send(serialized)
            .await
            .map_err(|_| ClientError::Transport("writer channel closed".to_string()))?;

        Ok(())
    }

    /// Shut down the transport: cancel pending requests, close the child's
    /// stdin, wait up to [`SHUTDOWN_GRACE`] for a voluntary exit, then kill.
    /// Idempotent; a second close is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.fail_all(|| ClientError::Cancelled);

        // Dropping the write channel sends EOF to child stdin
        self.write_tx
            .lock()
            .expect("write sender lock poisoned")
            .take();

        let child = Arc::clone(&self.child);
        let graceful = tokio::time::timeout(SHUTDOWN_GRACE, async {
            let mut guard = child.lock().await;
            if let Some(child) = guard.as_mut() {
                let _ = child.wait().await;
            }
            guard.take();
        })
        .await;

        if graceful.is_err() {
            let mut guard = self.child.lock().await;
            if let Some(mut child) = guard.take() {
                tracing::debug!("Child did not exit within grace period, killing");
                let _ = child.kill().await;
            }
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A mock server that answers every request with `{"ok": true}`.
    fn echo_server_script() -> Vec<String> {
        let script = r#"while IFS= read -r line; do id=$(echo "$line" | python3 -c "import sys,json; print(json.loads(sys.stdin.read())['id'])"); echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"ok\":true}}"; done"#;
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn spawn_and_close() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new(), 5000);
        assert!(transport.is_ok());
        transport.unwrap().close().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = StdioTransport::spawn(
            "this_command_does_not_exist_xyz123",
            &[],
            &HashMap::new(),
            5000,
        );
        match result {
            Err(ClientError::Spawn { name, .. }) => {
                assert_eq!(name, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("Expected Spawn, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip_with_mock() {
        let transport =
            StdioTransport::spawn("bash", &echo_server_script(), &HashMap::new(), 5000);
        if transport.is_err() {
            // Skip test if bash/python3 not available
            return;
        }
        let transport = transport.unwrap();

        let resp = transport
            .send_request("test/method", Some(serde_json::json!({})))
            .await;
        assert!(resp.is_ok());
        assert_eq!(resp.unwrap().result.unwrap()["ok"], true);

        transport.close().await;
    }

    #[tokio::test]
    async fn concurrent_requests_each_get_their_own_response() {
        let transport =
            StdioTransport::spawn("bash", &echo_server_script(), &HashMap::new(), 5000);
        if transport.is_err() {
            return;
        }
        let transport = transport.unwrap();

        let (a, b) = tokio::join!(
            transport.send_request("one", Some(serde_json::json!({}))),
            transport.send_request("two", Some(serde_json::json!({}))),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        transport.close().await;
    }

    #[tokio::test]
    async fn notification_does_not_block() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new(), 5000).unwrap();
        let result = transport
            .send_notification("notifications/initialized", None)
            .await;
        assert!(result.is_ok());
        transport.close().await;
    }

    #[tokio::test]
    async fn timeout_fires_on_unresponsive_server() {
        // `sleep` never writes to stdout, so requests time out
        let transport =
            StdioTransport::spawn("sleep", &["10".to_string()], &HashMap::new(), 100).unwrap();

        let result = transport
            .send_request("test/method", Some(serde_json::json!({})))
            .await;
        match result.unwrap_err() {
            ClientError::Timeout { timeout_ms, .. } => assert_eq!(timeout_ms, 100),
            other => panic!("Expected Timeout, got: {other:?}"),
        }

        transport.close().await;
    }

    #[tokio::test]
    async fn process_exit_fails_all_pending_requests() {
        // Consumes two lines of input, answers neither, then exits.
        let script = r#"read -r one; read -r two; exit 0"#;
        let transport = StdioTransport::spawn(
            "bash",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
            10_000,
        )
        .unwrap();

        let (a, b) = tokio::join!(
            transport.send_request("first", Some(serde_json::json!({}))),
            transport.send_request("second", Some(serde_json::json!({}))),
        );
        for result in [a, b] {
            match result.unwrap_err() {
                ClientError::Transport(msg) => assert!(msg.contains("exited")),
                other => panic!("Expected Transport, got: {other:?}"),
            }
        }

        // The transport is closed; later operations are rejected.
        let err = transport.send_request("third", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));

        transport.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new(), 5000).unwrap();
        transport.close().await;
        transport.close().await;
    }

    #[tokio::test]
    async fn operations_after_close_are_rejected() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new(), 5000).unwrap();
        transport.close().await;
        let err = transport.send_request("test", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
