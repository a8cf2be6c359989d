//! In-process fixture server used across session, client, and aggregator
//! tests.

use std::future::Future;
use std::pin::Pin;

use tether_types::{JsonRpcRequest, JsonRpcResponse};

use crate::transport::InProcessServer;

/// A minimal backend exposing a `ping` tool, a `sleep` tool, and one
/// readable resource, all labelled so tests can tell backends apart.
pub struct FixtureServer {
    label: String,
    delay_ms: u64,
}

impl FixtureServer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            delay_ms: 0,
        }
    }

    /// How long the `sleep` tool blocks before answering.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn resource_uri(&self) -> String {
        format!("note://{}/readme", self.label)
    }

    fn respond(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "protocolVersion": crate::session::PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": {"name": self.label, "version": "0.0.1"}
                }),
            ),
            "ping" => JsonRpcResponse::ok(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "tools": [
                        {
                            "name": "ping",
                            "description": format!("Ping the {} backend", self.label),
                            "inputSchema": {"type": "object", "properties": {}}
                        },
                        {
                            "name": "sleep",
                            "description": "Answer slowly",
                            "inputSchema": {"type": "object", "properties": {}}
                        }
                    ]
                }),
            ),
            "resources/list" => JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "resources": [
                        {
                            "uri": self.resource_uri(),
                            "name": "readme",
                            "mimeType": "text/plain"
                        }
                    ]
                }),
            ),
            "resources/read" => {
                let uri = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(|u| u.as_str())
                    .unwrap_or_default();
                if uri == self.resource_uri() {
                    JsonRpcResponse::ok(
                        id,
                        serde_json::json!({
                            "contents": [
                                {
                                    "uri": uri,
                                    "mimeType": "text/plain",
                                    "text": format!("readme from {}", self.label)
                                }
                            ]
                        }),
                    )
                } else {
                    JsonRpcResponse::err(id, -32002, format!("Resource not found: {uri}"))
                }
            }
            "tools/call" => {
                let name = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                match name {
                    "ping" => JsonRpcResponse::ok(
                        id,
                        serde_json::json!({
                            "content": [
                                {"type": "text", "text": format!("pong from {}", self.label)}
                            ],
                            "isError": false
                        }),
                    ),
                    // Handled in `handle` so the delay is async
                    "sleep" => JsonRpcResponse::ok(
                        id,
                        serde_json::json!({
                            "content": [{"type": "text", "text": "slept"}],
                            "isError": false
                        }),
                    ),
                    other => JsonRpcResponse::err(id, -32602, format!("Unknown tool: {other}")),
                }
            }
            other => JsonRpcResponse::err(id, -32601, format!("Method not found: {other}")),
        }
    }
}

impl InProcessServer for FixtureServer {
    fn handle(
        &self,
        request: JsonRpcRequest,
    ) -> Pin<Box<dyn Future<Output = JsonRpcResponse> + Send + '_>> {
        Box::pin(async move {
            let is_sleep = request.method == "tools/call"
                && request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    == Some("sleep");
            if is_sleep && self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            self.respond(&request)
        })
    }
}
