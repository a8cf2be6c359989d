//! Error taxonomy for client operations.

use thiserror::Error;

/// Errors from connecting to and calling backend servers.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to spawn '{name}': {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to connect to '{name}': {message}")]
    Connection { name: String, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("JSON-RPC error from '{backend}' (code {code}): {message}")]
    Rpc {
        backend: String,
        code: i64,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown tool: {name}")]
    ToolNotFound { name: String },

    #[error("Unknown resource: {uri}")]
    ResourceNotFound { uri: String },

    #[error("Backend '{backend}': {source}")]
    Backend {
        backend: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Broad failure category, for callers deciding whether to retry,
/// reconnect, or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad target shape or ambiguous selection. Never retried.
    Configuration,
    /// Open/spawn failure; retrying is the caller's call.
    Connection,
    /// Mid-session channel failure; the session is closed.
    Transport,
    /// One request exceeded its deadline; the session stays usable.
    Timeout,
    /// Caller-initiated abandonment of one request.
    Cancelled,
    /// The backend handled the request and reported an error.
    Remote,
    /// Malformed or unexpected wire traffic.
    Protocol,
}

impl ClientError {
    /// Classify this error, looking through aggregator tagging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::ToolNotFound { .. } | Self::ResourceNotFound { .. } => {
                ErrorKind::Configuration
            }
            Self::Spawn { .. } | Self::Connection { .. } => ErrorKind::Connection,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Rpc { .. } => ErrorKind::Remote,
            Self::Protocol(_) | Self::Json(_) => ErrorKind::Protocol,
            Self::Backend { source, .. } => source.kind(),
        }
    }

    /// Tag this error with the backend it came from.
    pub fn for_backend(self, backend: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            source: Box::new(self),
        }
    }
}
