//! Session lifecycle: one transport per session, opened lazily, reused
//! across usage scopes under the keep-alive policy, torn down on explicit
//! close or last scope exit.
//!
//! A usage scope is entered with [`Session::acquire`] and exits when the
//! returned [`SessionGuard`] drops, so the session returns to its managed
//! state on every exit path, including error propagation. Transport
//! creation is serialized by a single creation lock; concurrent scope
//! entries never spawn duplicate subprocesses.

use std::sync::{Arc, Mutex};

use tether_types::{ClientError, JsonRpcResponse};
use uuid::Uuid;

use crate::transport::{Transport, TransportSpec};

/// Protocol version sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Per-session behavior knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// When true (the default) the transport persists across scope
    /// enter/exit cycles until an explicit close; when false every scope
    /// gets a fresh transport and tears it down on exit.
    pub keep_alive: bool,
    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            timeout_ms: 30_000,
        }
    }
}

struct SlotEntry {
    transport: Arc<Transport>,
    refs: usize,
}

#[derive(Default)]
struct Slot {
    entry: Option<SlotEntry>,
}

/// Wraps one transport and governs its lifecycle.
pub struct Session {
    name: String,
    spec: TransportSpec,
    options: SessionOptions,
    create_lock: tokio::sync::Mutex<()>,
    slot: Arc<Mutex<Slot>>,
}

impl Session {
    pub fn new(name: impl Into<String>, spec: TransportSpec) -> Self {
        Self::with_options(name, spec, SessionOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        spec: TransportSpec,
        options: SessionOptions,
    ) -> Self {
        Self {
            name: name.into(),
            spec,
            options,
            create_lock: tokio::sync::Mutex::new(()),
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Whether a transport is currently held open.
    pub fn is_open(&self) -> bool {
        self.slot.lock().expect("session slot lock poisoned").entry.is_some()
    }

    /// Enter a usage scope: reuse the held transport or open a fresh one
    /// (connect + handshake). The guard keeps the scope open until
    /// dropped.
    pub async fn acquire(&self) -> Result<SessionGuard, ClientError> {
        let _creating = self.create_lock.lock().await;

        {
            let mut slot = self.slot.lock().expect("session slot lock poisoned");
            if let Some(entry) = slot.entry.as_mut() {
                entry.refs += 1;
                return Ok(SessionGuard {
                    transport: Arc::clone(&entry.transport),
                    slot: Arc::clone(&self.slot),
                    keep_alive: self.options.keep_alive,
                });
            }
        }

        tracing::debug!(
            "Opening {:?} transport for '{}'",
            self.spec.kind(),
            self.name
        );
        let transport = Arc::new(Transport::connect(&self.spec, self.options.timeout_ms).await?);
        if let Err(e) = self.handshake(&transport).await {
            transport.close().await;
            return Err(e);
        }
        tracing::info!("Session '{}' connected", self.name);

        let mut slot = self.slot.lock().expect("session slot lock poisoned");
        slot.entry = Some(SlotEntry {
            transport: Arc::clone(&transport),
            refs: 1,
        });
        Ok(SessionGuard {
            transport,
            slot: Arc::clone(&self.slot),
            keep_alive: self.options.keep_alive,
        })
    }

    /// MCP handshake: `initialize` followed by the `initialized`
    /// notification, once per fresh transport.
    async fn handshake(&self, transport: &Transport) -> Result<(), ClientError> {
        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "tether",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = transport.send_request("initialize", Some(init_params)).await?;
        if let Some(err) = resp.error {
            return Err(ClientError::Rpc {
                backend: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }

        transport
            .send_notification("notifications/initialized", None)
            .await
    }

    /// Terminate the held transport immediately, cancelling its pending
    /// requests. The next scope entry opens a brand-new transport.
    pub async fn close(&self) {
        let entry = {
            let mut slot = self.slot.lock().expect("session slot lock poisoned");
            slot.entry.take()
        };
        if let Some(entry) = entry {
            tracing::info!("Session '{}' closed", self.name);
            entry.transport.close().await;
        }
    }
}

/// An entered usage scope. Holds the session's transport; dropping it
/// exits the scope, and the last scope exit tears the transport down when
/// keep-alive is off.
pub struct SessionGuard {
    transport: Arc<Transport>,
    slot: Arc<Mutex<Slot>>,
    keep_alive: bool,
}

impl SessionGuard {
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn instance_id(&self) -> Uuid {
        self.transport.instance_id()
    }

    /// One correlated request/response exchange over the owned transport.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        self.transport.send_request(method, params).await
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().expect("session slot lock poisoned");
        let Some(entry) = slot.entry.as_mut() else {
            return;
        };
        // Guards from a transport that was explicitly closed and replaced
        // must not touch the current entry.
        if !Arc::ptr_eq(&entry.transport, &self.transport) {
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 && !self.keep_alive {
            if let Some(entry) = slot.entry.take() {
                drop(slot);
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move { entry.transport.close().await });
                }
                // Without a runtime, subprocess cleanup falls back to
                // kill_on_drop.
            }
        }
    }
}
