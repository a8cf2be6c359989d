//! Streamable HTTP transport: the default network variant.
//!
//! Each request is one POST carrying a JSON-RPC message; the server answers
//! either with a plain JSON body or with a short SSE stream that carries
//! the correlated response. A server-assigned session id (`mcp-session-id`
//! header) is captured from the first response and echoed on every
//! subsequent request, then released with a DELETE on close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tether_types::{ClientError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use uuid::Uuid;

use crate::sse::SseParser;

const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Streamable HTTP transport for a network-hosted server.
pub struct HttpTransport {
    instance_id: Uuid,
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
    next_id: AtomicU64,
    session_id: std::sync::Mutex<Option<String>>,
    closed: AtomicBool,
    timeout_ms: u64,
}

impl HttpTransport {
    /// Build the transport. Performs no I/O; the first request carries the
    /// handshake.
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        timeout_ms: u64,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Connection {
                name: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            instance_id: Uuid::new_v4(),
            http,
            url: url.to_string(),
            headers: build_headers(headers)?,
            next_id: AtomicU64::new(1),
            session_id: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
            timeout_ms,
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        let session_id = self.session_id.lock().expect("session id lock poisoned");
        if let Some(id) = session_id.as_deref() {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(SESSION_ID_HEADER, value);
            }
        }
        headers
    }

    fn capture_session_id(&self, response_headers: &HeaderMap) {
        if let Some(id) = response_headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut session_id = self.session_id.lock().expect("session id lock poisoned");
            if session_id.as_deref() != Some(id) {
                tracing::debug!("Captured server session id");
                *session_id = Some(id.to_string());
            }
        }
    }

    /// POST one JSON-RPC request and wait for its correlated response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("transport is closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let timeout = Duration::from_millis(self.timeout_ms);

        match tokio::time::timeout(timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout_ms,
            }),
        }
    }

    async fn exchange(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, ClientError> {
        tracing::debug!("POST {} ({})", self.url, request.method);
        let response = self
            .http
            .post(&self.url)
            .headers(self.request_headers())
            .json(request)
            .send()
            .await
            .map_err(|e| classify_send_error(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(&self.url, status.as_u16(), &body));
        }

        self.capture_session_id(response.headers());

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if is_event_stream {
            self.scan_event_stream(response, request.id).await
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
            let parsed: JsonRpcResponse = serde_json::from_str(&body)
                .map_err(|e| ClientError::Protocol(format!("malformed response body: {e}")))?;
            if parsed.id != Some(request.id) {
                tracing::warn!("Dropping response with unrecognized id {:?}", parsed.id);
                return Err(ClientError::Protocol(
                    "response id does not match request".to_string(),
                ));
            }
            Ok(parsed)
        }
    }

    /// Read the response SSE stream until the message correlated with
    /// `want_id` arrives.
    async fn scan_event_stream(
        &self,
        response: reqwest::Response,
        want_id: u64,
    ) -> Result<JsonRpcResponse, ClientError> {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::Transport(e.to_string()))?;
            let text = String::from_utf8_lossy(&chunk);
            for event in parser.feed(&text) {
                if let Some(resp) = response_from_event(&event.data, want_id) {
                    return Ok(resp);
                }
            }
        }

        Err(ClientError::Transport(
            "event stream ended without a response".to_string(),
        ))
    }

    /// POST a fire-and-forget notification.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("transport is closed".to_string()));
        }

        let notification = JsonRpcNotification::new(method, params);
        let timeout = Duration::from_millis(self.timeout_ms);

        let send = async {
            let response = self
                .http
                .post(&self.url)
                .headers(self.request_headers())
                .json(&notification)
                .send()
                .await
                .map_err(|e| classify_send_error(&self.url, e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(&self.url, status.as_u16(), &body));
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout_ms,
            }),
        }
    }

    /// Release the server-side session, if one was assigned. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let session_id = self
            .session_id
            .lock()
            .expect("session id lock poisoned")
            .take();
        if let Some(id) = session_id {
            // Best-effort release; the server also expires idle sessions
            let result = tokio::time::timeout(
                Duration::from_secs(5),
                self.http
                    .delete(&self.url)
                    .headers(self.headers.clone())
                    .header(SESSION_ID_HEADER, id)
                    .send(),
            )
            .await;
            if let Ok(Err(e)) = result {
                tracing::debug!("Session release failed: {e}");
            }
        }
    }
}

/// Parse one SSE data payload; return it only if it is the response
/// correlated with `want_id`. Anything else is logged and dropped.
fn response_from_event(data: &str, want_id: u64) -> Option<JsonRpcResponse> {
    let parsed: JsonRpcResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("Ignoring non-response event: {e}");
            return None;
        }
    };
    if parsed.id == Some(want_id) {
        Some(parsed)
    } else {
        if parsed.id.is_some() {
            tracing::warn!("Dropping response with unrecognized id {:?}", parsed.id);
        }
        None
    }
}

pub(crate) fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, ClientError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ClientError::Configuration(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ClientError::Configuration(format!("invalid value for header '{name}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}

pub(crate) fn classify_send_error(url: &str, e: reqwest::Error) -> ClientError {
    if e.is_connect() {
        ClientError::Connection {
            name: url.to_string(),
            message: e.to_string(),
        }
    } else {
        ClientError::Transport(e.to_string())
    }
}

fn classify_status(url: &str, status: u16, body: &str) -> ClientError {
    match status {
        401 | 403 => ClientError::Connection {
            name: url.to_string(),
            message: format!("HTTP {status}: {body}"),
        },
        _ => ClientError::Transport(format!("HTTP {status}: {body}")),
    }
}
