//! Multi-backend composition.
//!
//! An aggregator owns one client per named backend and exposes their union
//! as a single flat namespace. With two or more backends, tool names are
//! rewritten to `<backend>_<name>` and resource URIs gain the backend name
//! as their first authority segment; with exactly one backend the
//! aggregator is a transparent pass-through, so a configuration can grow
//! from one backend to many without renaming anything for its callers.

use std::collections::BTreeMap;

use tether_types::{
    ClientError, ResourceContents, ResourceDescriptor, ToolDescriptor, ToolResult,
};

use crate::client::Client;
use crate::config::ServersConfig;
use crate::target::ConnectionTarget;

/// A set of named backends behind one call interface.
pub struct Aggregator {
    backends: Vec<Backend>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field(
                "backends",
                &self.backends.iter().map(|b| &b.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

struct Backend {
    name: String,
    client: Client,
}

impl Aggregator {
    /// Build one client per entry, each resolved independently through the
    /// transport selector.
    pub fn new(targets: BTreeMap<String, ConnectionTarget>) -> Result<Self, ClientError> {
        if targets.is_empty() {
            return Err(ClientError::Configuration(
                "aggregator needs at least one backend".to_string(),
            ));
        }
        let mut backends = Vec::with_capacity(targets.len());
        for (name, target) in targets {
            let client =
                Client::new(&name, &target).map_err(|e| e.for_backend(name.clone()))?;
            backends.push(Backend { name, client });
        }
        Ok(Self { backends })
    }

    /// Build from a multi-server connection target, the shape produced by
    /// [`ServersConfig::connection_target`]. Anything but
    /// [`ConnectionTarget::MultiServer`] belongs to a single [`Client`] and
    /// is rejected.
    pub fn from_target(target: ConnectionTarget) -> Result<Self, ClientError> {
        match target {
            ConnectionTarget::MultiServer(map) => Self::new(map),
            other => Err(ClientError::Configuration(format!(
                "expected a multi-server target, got {other:?}"
            ))),
        }
    }

    /// Build from declarative server records, honoring each record's
    /// timeout and keep-alive settings.
    pub fn from_config(config: &ServersConfig) -> Result<Self, ClientError> {
        if config.servers.is_empty() {
            return Err(ClientError::Configuration(
                "aggregator needs at least one backend".to_string(),
            ));
        }
        let mut backends = Vec::with_capacity(config.servers.len());
        for (name, server) in &config.servers {
            let client = Client::with_options(
                name,
                &server.connection_target(),
                server.session_options(),
            )
            .map_err(|e| e.for_backend(name.clone()))?;
            backends.push(Backend {
                name: name.clone(),
                client,
            });
        }
        Ok(Self { backends })
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name.as_str()).collect()
    }

    /// Prefixing applies only with two or more backends.
    fn prefixed(&self) -> bool {
        self.backends.len() > 1
    }

    /// Union of every backend's tools. A backend that fails to answer is
    /// logged and skipped so one bad backend cannot take the rest down;
    /// the error surfaces only if every backend fails.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        if !self.prefixed() {
            let backend = &self.backends[0];
            return backend
                .client
                .list_tools()
                .await
                .map_err(|e| e.for_backend(backend.name.clone()));
        }

        let mut all_tools = Vec::new();
        let mut healthy = 0usize;
        let mut first_error = None;
        for backend in &self.backends {
            match backend.client.list_tools().await {
                Ok(tools) => {
                    healthy += 1;
                    for mut tool in tools {
                        tool.name = format!("{}_{}", backend.name, tool.name);
                        tool.backend = Some(backend.name.clone());
                        all_tools.push(tool);
                    }
                }
                Err(e) => {
                    tracing::warn!("Backend '{}' failed to list tools: {e}", backend.name);
                    first_error.get_or_insert(e.for_backend(backend.name.clone()));
                }
            }
        }
        if healthy == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(all_tools)
    }

    /// Union of every backend's resources, with prefixed URIs.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ClientError> {
        if !self.prefixed() {
            let backend = &self.backends[0];
            return backend
                .client
                .list_resources()
                .await
                .map_err(|e| e.for_backend(backend.name.clone()));
        }

        let mut all_resources = Vec::new();
        let mut healthy = 0usize;
        let mut first_error = None;
        for backend in &self.backends {
            match backend.client.list_resources().await {
                Ok(resources) => {
                    healthy += 1;
                    for mut resource in resources {
                        resource.uri = prefix_uri(&backend.name, &resource.uri);
                        resource.backend = Some(backend.name.clone());
                        all_resources.push(resource);
                    }
                }
                Err(e) => {
                    tracing::warn!("Backend '{}' failed to list resources: {e}", backend.name);
                    first_error.get_or_insert(e.for_backend(backend.name.clone()));
                }
            }
        }
        if healthy == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(all_resources)
    }

    /// Route a tool call to the backend owning it.
    ///
    /// Backend names may themselves contain underscores, so routing picks
    /// the longest configured `<backend>_` prefix that matches.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ClientError> {
        if !self.prefixed() {
            let backend = &self.backends[0];
            return backend
                .client
                .call_tool(name, arguments)
                .await
                .map_err(|e| e.for_backend(backend.name.clone()));
        }

        let Some(backend) = self.route_tool(name) else {
            return Err(ClientError::ToolNotFound {
                name: name.to_string(),
            });
        };
        let original = &name[backend.name.len() + 1..];
        backend
            .client
            .call_tool(original, arguments)
            .await
            .map_err(|e| e.for_backend(backend.name.clone()))
    }

    /// Route a resource read to the backend owning it.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, ClientError> {
        if !self.prefixed() {
            let backend = &self.backends[0];
            return backend
                .client
                .read_resource(uri)
                .await
                .map_err(|e| e.for_backend(backend.name.clone()));
        }

        let Some((backend_name, original)) = strip_uri_prefix(uri) else {
            return Err(ClientError::ResourceNotFound {
                uri: uri.to_string(),
            });
        };
        let Some(backend) = self.backends.iter().find(|b| b.name == backend_name) else {
            return Err(ClientError::ResourceNotFound {
                uri: uri.to_string(),
            });
        };
        backend
            .client
            .read_resource(&original)
            .await
            .map_err(|e| e.for_backend(backend.name.clone()))
    }

    /// Close every backend session.
    pub async fn close(&self) {
        for backend in &self.backends {
            backend.client.close().await;
        }
    }

    fn route_tool(&self, name: &str) -> Option<&Backend> {
        self.backends
            .iter()
            .filter(|b| {
                name.len() > b.name.len() + 1 && name.starts_with(&b.name) &&
                    name.as_bytes()[b.name.len()] == b'_'
            })
            .max_by_key(|b| b.name.len())
    }
}

/// `scheme://rest` becomes `scheme://<backend>/rest`. URIs without a
/// scheme are left untouched.
fn prefix_uri(backend: &str, uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://{backend}/{rest}"),
        None => uri.to_string(),
    }
}

/// Inverse of [`prefix_uri`]: pull the backend name back out of the first
/// authority segment.
fn strip_uri_prefix(uri: &str) -> Option<(String, String)> {
    let (scheme, rest) = uri.split_once("://")?;
    let (backend, original_rest) = rest.split_once('/')?;
    Some((backend.to_string(), format!("{scheme}://{original_rest}")))
}
