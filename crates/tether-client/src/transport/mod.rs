//! Transport variants and their common contract.
//!
//! A transport is the concrete channel used to exchange correlated
//! JSON-RPC requests and responses with one backend server. The set of
//! variants is closed: subprocess stdio, streamable HTTP, HTTP+SSE, and
//! in-process. Dispatch happens once at construction via [`TransportSpec`];
//! calling code never inspects the variant again.

pub mod http;
pub mod inprocess;
pub mod sse;
pub mod stdio;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tether_types::{ClientError, JsonRpcResponse};
use uuid::Uuid;

pub use http::HttpTransport;
pub use inprocess::{InProcessServer, InProcessTransport};
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Which transport variant a spec or transport resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
    Sse,
    InProcess,
}

/// A fully-resolved recipe for constructing one transport.
///
/// Produced by the selector ([`TransportSpec::infer`]) or built explicitly
/// by the caller for shapes the selector refuses to guess at (packaged
/// tools, custom commands). Construction performs no I/O.
///
/// [`TransportSpec::infer`]: crate::target
#[derive(Clone)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    InProcess {
        server: Arc<dyn InProcessServer>,
    },
}

impl TransportSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::StreamableHttp { .. } => TransportKind::StreamableHttp,
            Self::Sse { .. } => TransportKind::Sse,
            Self::InProcess { .. } => TransportKind::InProcess,
        }
    }

    /// A stdio spec running a Python tool package through `uvx`.
    pub fn uvx(package: impl Into<String>) -> Self {
        Self::Stdio {
            command: "uvx".to_string(),
            args: vec![package.into()],
            env: HashMap::new(),
        }
    }

    /// A stdio spec running a Node tool package through `npx`.
    pub fn npx(package: impl Into<String>) -> Self {
        Self::Stdio {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), package.into()],
            env: HashMap::new(),
        }
    }
}

impl fmt::Debug for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio { command, args, .. } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .finish_non_exhaustive(),
            Self::StreamableHttp { url, .. } => f
                .debug_struct("StreamableHttp")
                .field("url", url)
                .finish_non_exhaustive(),
            Self::Sse { url, .. } => {
                f.debug_struct("Sse").field("url", url).finish_non_exhaustive()
            }
            Self::InProcess { .. } => f.debug_struct("InProcess").finish_non_exhaustive(),
        }
    }
}

/// One open channel to a backend server.
///
/// Exclusively owned by the session that created it. `close` is idempotent
/// on every variant.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    Sse(SseTransport),
    InProcess(InProcessTransport),
}

impl Transport {
    /// Open the channel described by `spec`. For the stdio variant this
    /// spawns the child process; for SSE it performs the handshake GET;
    /// streamable HTTP and in-process defer I/O to the first request.
    pub async fn connect(spec: &TransportSpec, timeout_ms: u64) -> Result<Self, ClientError> {
        match spec {
            TransportSpec::Stdio { command, args, env } => Ok(Self::Stdio(
                StdioTransport::spawn(command, args, env, timeout_ms)?,
            )),
            TransportSpec::StreamableHttp { url, headers } => {
                Ok(Self::Http(HttpTransport::new(url, headers, timeout_ms)?))
            }
            TransportSpec::Sse { url, headers } => Ok(Self::Sse(
                SseTransport::connect(url, headers, timeout_ms).await?,
            )),
            TransportSpec::InProcess { server } => Ok(Self::InProcess(InProcessTransport::start(
                Arc::clone(server),
                timeout_ms,
            ))),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::StreamableHttp,
            Self::Sse(_) => TransportKind::Sse,
            Self::InProcess(_) => TransportKind::InProcess,
        }
    }

    /// Identity of this transport instance, for observing lifecycle reuse.
    pub fn instance_id(&self) -> Uuid {
        match self {
            Self::Stdio(t) => t.instance_id(),
            Self::Http(t) => t.instance_id(),
            Self::Sse(t) => t.instance_id(),
            Self::InProcess(t) => t.instance_id(),
        }
    }

    /// OS process id of the child, for the stdio variant.
    pub fn process_id(&self) -> Option<u32> {
        match self {
            Self::Stdio(t) => t.process_id(),
            _ => None,
        }
    }

    /// Send one correlated request and wait for its response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        match self {
            Self::Stdio(t) => t.send_request(method, params).await,
            Self::Http(t) => t.send_request(method, params).await,
            Self::Sse(t) => t.send_request(method, params).await,
            Self::InProcess(t) => t.send_request(method, params).await,
        }
    }

    /// Send a fire-and-forget notification.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        match self {
            Self::Stdio(t) => t.send_notification(method, params).await,
            Self::Http(t) => t.send_notification(method, params).await,
            Self::Sse(t) => t.send_notification(method, params).await,
            Self::InProcess(t) => t.send_notification(method, params).await,
        }
    }

    /// Release the channel. Pending requests fail with `Cancelled`.
    pub async fn close(&self) {
        match self {
            Self::Stdio(t) => t.close().await,
            Self::Http(t) => t.close().await,
            Self::Sse(t) => t.close().await,
            Self::InProcess(t) => t.close().await,
        }
    }
}
