//! Client for a single backend server.
//!
//! Wraps a [`Session`] and exposes the tool/resource call interface. Every
//! operation enters a usage scope, performs one correlated exchange, and
//! exits; under the default keep-alive policy the underlying transport
//! persists across calls.

use serde::Deserialize;
use tether_types::{
    ClientError, JsonRpcResponse, ResourceContents, ResourceDescriptor, ToolDescriptor, ToolResult,
};

use crate::session::{Session, SessionOptions};
use crate::target::ConnectionTarget;
use crate::transport::TransportSpec;

pub use crate::session::PROTOCOL_VERSION;

/// Client for one backend server.
pub struct Client {
    session: Session,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

#[derive(Deserialize)]
struct ResourcesListResult {
    #[serde(default)]
    resources: Vec<ResourceDescriptor>,
}

#[derive(Deserialize)]
struct ReadResourceResult {
    #[serde(default)]
    contents: Vec<ResourceContents>,
}

impl Client {
    /// Build a client for `target`, resolving the transport through the
    /// selector. Multi-server targets are rejected here; compose them with
    /// [`crate::Aggregator::from_target`].
    pub fn new(name: impl Into<String>, target: &ConnectionTarget) -> Result<Self, ClientError> {
        Self::with_options(name, target, SessionOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        target: &ConnectionTarget,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let spec = TransportSpec::infer(target)?;
        Ok(Self::from_spec(name, spec, options))
    }

    /// Build a client from an explicit transport recipe, bypassing the
    /// selector.
    pub fn from_spec(
        name: impl Into<String>,
        spec: TransportSpec,
        options: SessionOptions,
    ) -> Self {
        Self {
            session: Session::with_options(name, spec, options),
        }
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Terminate the underlying transport. The next call reconnects.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Liveness check against the backend.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let guard = self.session.acquire().await?;
        let resp = guard.request("ping", None).await?;
        self.expect_result(resp, "ping").map(|_| ())
    }

    /// List the tools the backend exposes.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let guard = self.session.acquire().await?;
        let resp = guard.request("tools/list", None).await?;
        let result = self.expect_result(resp, "tools/list")?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed tools/list result: {e}")))?;
        Ok(list.tools)
    }

    /// List the resources the backend exposes.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ClientError> {
        let guard = self.session.acquire().await?;
        let resp = guard.request("resources/list", None).await?;
        let result = self.expect_result(resp, "resources/list")?;
        let list: ResourcesListResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed resources/list result: {e}")))?;
        Ok(list.resources)
    }

    /// Call a tool by name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ClientError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let guard = self.session.acquire().await?;
        let resp = guard.request("tools/call", Some(params)).await?;
        let result = self.expect_result(resp, "tools/call")?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed tools/call result: {e}")))
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, ClientError> {
        let params = serde_json::json!({ "uri": uri });
        let guard = self.session.acquire().await?;
        let resp = guard.request("resources/read", Some(params)).await?;
        let result = self.expect_result(resp, "resources/read")?;
        let read: ReadResourceResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed resources/read result: {e}")))?;
        Ok(read.contents)
    }

    fn expect_result(
        &self,
        resp: JsonRpcResponse,
        method: &str,
    ) -> Result<serde_json::Value, ClientError> {
        if let Some(err) = resp.error {
            return Err(ClientError::Rpc {
                backend: self.name().to_string(),
                code: err.code,
                message: err.message,
            });
        }
        resp.result.ok_or_else(|| {
            ClientError::Protocol(format!("{method} response has neither result nor error"))
        })
    }
}
