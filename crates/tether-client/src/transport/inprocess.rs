//! In-process transport: calls a server living in the same process through
//! an internal queue standing in for the network boundary.
//!
//! Used for testing and zero-latency composition. The call contract (async
//! semantics, correlation, error surface) matches the network variants so
//! code written against one is portable to the others.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tether_types::{ClientError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::pending::RequestMap;

/// A server hosted in the same process.
///
/// Object-safe; implementations return boxed futures so the transport can
/// hold the server behind `Arc<dyn InProcessServer>`.
pub trait InProcessServer: Send + Sync + 'static {
    /// Handle one request and produce its response.
    fn handle(
        &self,
        request: JsonRpcRequest,
    ) -> Pin<Box<dyn Future<Output = JsonRpcResponse> + Send + '_>>;

    /// Handle a notification. The default implementation ignores it.
    fn handle_notification(
        &self,
        _notification: JsonRpcNotification,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

enum Inbound {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

/// Transport that dispatches to an [`InProcessServer`] through a queue.
pub struct InProcessTransport {
    instance_id: Uuid,
    pending: Arc<RequestMap>,
    queue_tx: std::sync::Mutex<Option<mpsc::Sender<Inbound>>>,
    worker_handle: JoinHandle<()>,
    closed: AtomicBool,
    timeout_ms: u64,
}

impl InProcessTransport {
    /// Start the dispatch worker for `server`.
    pub fn start(server: Arc<dyn InProcessServer>, timeout_ms: u64) -> Self {
        let pending = Arc::new(RequestMap::new());
        let (queue_tx, mut queue_rx) = mpsc::channel::<Inbound>(64);

        // Worker: pulls messages off the queue and spawns one task per
        // request so concurrent requests resolve independently.
        let pending_for_worker = Arc::clone(&pending);
        let worker_handle = tokio::spawn(async move {
            while let Some(inbound) = queue_rx.recv().await {
                match inbound {
                    Inbound::Request(request) => {
                        let server = Arc::clone(&server);
                        let pending = Arc::clone(&pending_for_worker);
                        tokio::spawn(async move {
                            let id = request.id;
                            let response = server.handle(request).await;
                            if !pending.complete(id, response) {
                                tracing::warn!("Dropping response with unrecognized id {id}");
                            }
                        });
                    }
                    Inbound::Notification(notification) => {
                        server.handle_notification(notification).await;
                    }
                }
            }
        });

        Self {
            instance_id: Uuid::new_v4(),
            pending,
            queue_tx: std::sync::Mutex::new(Some(queue_tx)),
            worker_handle,
            closed: AtomicBool::new(false),
            timeout_ms,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    fn queue_sender(&self) -> Result<mpsc::Sender<Inbound>, ClientError> {
        self.queue_tx
            .lock()
            .expect("queue sender lock poisoned")
            .clone()
            .ok_or_else(|| ClientError::Transport("transport is closed".to_string()))
    }

    /// Send one correlated request through the queue and wait for its
    /// response.
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

        self.queue_sender()?
            .send(Inbound::Request(request))
            .await
            .map_err(|_| ClientError::Transport("dispatch queue closed".to_string()))?;

        pending
            .wait(method, Duration::from_millis(self.timeout_ms))
            .await
    }

    /// Send a fire-and-forget notification through the queue.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("transport is closed".to_string()));
        }

        self.queue_sender()?
            .send(Inbound::Notification(JsonRpcNotification::new(
                method, params,
            )))
            .await
            .map_err(|_| ClientError::Transport("dispatch queue closed".to_string()))?;

        Ok(())
    }

    /// Close the queue and cancel pending requests. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.fail_all(|| ClientError::Cancelled);
        self.queue_tx
            .lock()
            .expect("queue sender lock poisoned")
            .take();
        self.worker_handle.abort();
    }
}
