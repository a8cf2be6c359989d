//! Request correlation: maps in-flight request ids to waiting callers.
//!
//! Shared by every transport variant that multiplexes responses over one
//! channel (stdio, SSE, in-process). Ids are unique for the lifetime of a
//! transport and are retired when the caller completes, times out, or drops
//! its request future.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether_types::{ClientError, JsonRpcResponse};
use tokio::sync::oneshot;

type Completion = oneshot::Sender<Result<JsonRpcResponse, ClientError>>;

/// Correlation map for one transport instance.
pub struct RequestMap {
    next_id: AtomicU64,
    inflight: Mutex<HashMap<u64, Completion>>,
}

impl RequestMap {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh id and register a pending caller for it.
    pub fn register(self: &Arc<Self>) -> PendingRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inflight
            .lock()
            .expect("request map lock poisoned")
            .insert(id, tx);
        PendingRequest {
            map: Arc::clone(self),
            id,
            rx,
        }
    }

    /// Resolve the caller waiting on `id`. Returns false for unrecognized
    /// ids (already retired, timed out, or never issued).
    pub fn complete(&self, id: u64, response: JsonRpcResponse) -> bool {
        let tx = self
            .inflight
            .lock()
            .expect("request map lock poisoned")
            .remove(&id);
        match tx {
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Fail every pending caller with an error produced by `make_err`.
    pub fn fail_all(&self, make_err: impl Fn() -> ClientError) {
        let drained: Vec<Completion> = {
            let mut inflight = self.inflight.lock().expect("request map lock poisoned");
            inflight.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(make_err()));
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().expect("request map lock poisoned").len()
    }

    fn retire(&self, id: u64) {
        self.inflight
            .lock()
            .expect("request map lock poisoned")
            .remove(&id);
    }
}

/// One registered request. Dropping it before completion retires the id,
/// so cancelling a call (dropping its future) leaves no stale entry and any
/// late response for the id is treated as unrecognized.
pub struct PendingRequest {
    map: Arc<RequestMap>,
    id: u64,
    rx: oneshot::Receiver<Result<JsonRpcResponse, ClientError>>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the correlated response, up to `timeout`.
    pub async fn wait(
        mut self,
        method: &str,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, ClientError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Transport(
                "response channel dropped".to_string(),
            )),
            Err(_) => Err(ClientError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.map.retire(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_unique_while_pending() {
        let map = Arc::new(RequestMap::new());
        let a = map.register();
        let b = map.register();
        assert_ne!(a.id(), b.id());
        assert_eq!(map.inflight_count(), 2);
    }

    #[tokio::test]
    async fn complete_resolves_only_the_matching_caller() {
        let map = Arc::new(RequestMap::new());
        let a = map.register();
        let b = map.register();
        let (a_id, b_id) = (a.id(), b.id());

        assert!(map.complete(b_id, JsonRpcResponse::ok(b_id, serde_json::json!("b"))));
        assert!(map.complete(a_id, JsonRpcResponse::ok(a_id, serde_json::json!("a"))));

        let resp_b = b.wait("test", Duration::from_secs(1)).await.unwrap();
        let resp_a = a.wait("test", Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp_a.result.unwrap(), serde_json::json!("a"));
        assert_eq!(resp_b.result.unwrap(), serde_json::json!("b"));
    }

    #[tokio::test]
    async fn unrecognized_id_is_reported() {
        let map = Arc::new(RequestMap::new());
        assert!(!map.complete(999, JsonRpcResponse::ok(999, serde_json::json!({}))));
    }

    #[tokio::test]
    async fn timeout_retires_the_id() {
        let map = Arc::new(RequestMap::new());
        let pending = map.register();
        let id = pending.id();

        let err = pending
            .wait("tools/call", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));

        // A stray response after the deadline is unrecognized.
        assert!(!map.complete(id, JsonRpcResponse::ok(id, serde_json::json!({}))));
        assert_eq!(map.inflight_count(), 0);
    }

    #[tokio::test]
    async fn drop_cancels_and_retires() {
        let map = Arc::new(RequestMap::new());
        let pending = map.register();
        let id = pending.id();
        drop(pending);
        assert_eq!(map.inflight_count(), 0);
        assert!(!map.complete(id, JsonRpcResponse::ok(id, serde_json::json!({}))));
    }

    #[tokio::test]
    async fn fail_all_drains_every_pending_caller() {
        let map = Arc::new(RequestMap::new());
        let a = map.register();
        let b = map.register();
        map.fail_all(|| ClientError::Transport("process exited".to_string()));

        for pending in [a, b] {
            let err = pending.wait("test", Duration::from_secs(1)).await.unwrap_err();
            assert!(matches!(err, ClientError::Transport(_)));
        }
        assert_eq!(map.inflight_count(), 0);
    }
}
