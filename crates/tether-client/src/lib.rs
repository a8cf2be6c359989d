//! Multi-transport client connection layer for MCP-style tool servers.
//!
//! A backend server is addressed by a [`ConnectionTarget`]; the transport
//! selector resolves it to one of four transport variants (subprocess
//! stdio, streamable HTTP, HTTP+SSE, in-process), a [`Session`] manages the
//! transport's lifecycle under keep-alive reuse, and a [`Client`] exposes
//! the tool/resource call interface over it. [`Aggregator`] composes
//! several named backends into one collision-free namespace.

pub mod aggregator;
pub mod client;
pub mod config;
mod pending;
pub mod session;
mod sse;
pub mod target;
pub mod transport;

pub use aggregator::Aggregator;
pub use client::{Client, PROTOCOL_VERSION};
pub use config::{ServerConfig, ServersConfig};
pub use session::{Session, SessionGuard, SessionOptions};
pub use target::ConnectionTarget;
pub use tether_types::ClientError;
pub use transport::{InProcessServer, Transport, TransportKind, TransportSpec};

#[cfg(test)]
pub(crate) mod testutil;
