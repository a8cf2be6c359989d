//! Declarative server-map records.
//!
//! A `ServersConfig` is the serialized form of a multi-server mapping:
//! each entry is either a network endpoint (`url`) or a subprocess
//! command (`command`). Locating and reading config files is the host
//! application's job; this module only defines the records and their
//! conversion into connection targets.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::session::SessionOptions;
use crate::target::ConnectionTarget;
use crate::transport::TransportSpec;

fn default_timeout() -> u64 {
    30_000
}

fn default_keep_alive() -> bool {
    true
}

/// Top-level mapping of backend name to server record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// One backend server record; the field shape picks the flavor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerConfig {
    /// A network-hosted server.
    Network {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_timeout")]
        timeout_ms: u64,
        #[serde(default = "default_keep_alive")]
        keep_alive: bool,
    },
    /// A subprocess server (e.g. `npx`, `uvx`, `python`).
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default = "default_timeout")]
        timeout_ms: u64,
        #[serde(default = "default_keep_alive")]
        keep_alive: bool,
    },
}

impl ServerConfig {
    /// The connection target this record describes.
    pub fn connection_target(&self) -> ConnectionTarget {
        match self {
            Self::Network { url, headers, .. } => ConnectionTarget::NetworkEndpoint {
                url: url.clone(),
                headers: headers.clone(),
            },
            Self::Process {
                command, args, env, ..
            } => ConnectionTarget::Explicit(TransportSpec::Stdio {
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
            }),
        }
    }

    /// Session options carried by this record.
    pub fn session_options(&self) -> SessionOptions {
        let (timeout_ms, keep_alive) = match self {
            Self::Network {
                timeout_ms,
                keep_alive,
                ..
            }
            | Self::Process {
                timeout_ms,
                keep_alive,
                ..
            } => (*timeout_ms, *keep_alive),
        };
        SessionOptions {
            keep_alive,
            timeout_ms,
        }
    }
}

impl ServersConfig {
    /// Convert the whole mapping into a multi-server connection target.
    pub fn connection_target(&self) -> ConnectionTarget {
        ConnectionTarget::MultiServer(
            self.servers
                .iter()
                .map(|(name, server)| (name.clone(), server.connection_target()))
                .collect(),
        )
    }
}
