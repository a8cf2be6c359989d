//! HTTP+SSE transport.
//!
//! Opening performs a GET whose event stream stays up for the life of the
//! transport: the server first announces a POST endpoint (`endpoint`
//! event), then delivers every response as a `message` event. Requests are
//! POSTed to the announced endpoint and correlated back through the shared
//! request map, so arrival order is independent of issue order.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tether_types::{ClientError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::pending::RequestMap;
use crate::sse::{EVENT_ENDPOINT, EVENT_MESSAGE, SseEvent, SseParser};
use crate::transport::http::{build_headers, classify_send_error};

/// SSE transport for a network-hosted server.
pub struct SseTransport {
    instance_id: Uuid,
    http: reqwest::Client,
    post_url: String,
    headers: HeaderMap,
    pending: Arc<RequestMap>,
    reader_handle: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    timeout_ms: u64,
}

/// Pulls complete SSE events out of a response byte stream.
struct EventReader {
    stream: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    queued: VecDeque<SseEvent>,
}

impl EventReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            parser: SseParser::new(),
            queued: VecDeque::new(),
        }
    }

    async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    let text = String::from_utf8_lossy(&chunk);
                    self.queued.extend(self.parser.feed(&text));
                }
                Some(Err(e)) => {
                    tracing::warn!("Event stream error: {e}");
                    return None;
                }
                None => return None,
            }
        }
    }
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its POST
    /// endpoint.
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        timeout_ms: u64,
    ) -> Result<Self, ClientError> {
        let custom_headers = build_headers(headers)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Connection {
                name: url.to_string(),
                message: e.to_string(),
            })?;

        let mut get_headers = custom_headers.clone();
        get_headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = http
            .get(url)
            .headers(get_headers)
            .send()
            .await
            .map_err(|e| classify_send_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Connection {
                name: url.to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let mut reader = EventReader::new(response);
        let endpoint = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            wait_for_endpoint(&mut reader),
        )
        .await
        .map_err(|_| ClientError::Connection {
            name: url.to_string(),
            message: format!("no endpoint event within {timeout_ms}ms"),
        })??;

        let post_url = resolve_endpoint(url, &endpoint);
        tracing::debug!("SSE endpoint resolved to {post_url}");

        let pending = Arc::new(RequestMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        // Reader task: dispatches message events to pending callers for the
        // rest of the transport's life.
        let pending_for_reader = Arc::clone(&pending);
        let closed_for_reader = Arc::clone(&closed);
        let reader_handle = tokio::spawn(async move {
            while let Some(event) = reader.next_event().await {
                match event.event_type.as_deref() {
                    Some(EVENT_MESSAGE) | None => {
                        dispatch_message(&pending_for_reader, &event.data);
                    }
                    Some(other) => {
                        tracing::debug!("Ignoring SSE event type '{other}'");
                    }
                }
            }
            closed_for_reader.store(true, Ordering::SeqCst);
            pending_for_reader
                .fail_all(|| ClientError::Transport("event stream closed".to_string()));
        });

        Ok(Self {
            instance_id: Uuid::new_v4(),
            http,
            post_url,
            headers: custom_headers,
            pending,
            reader_handle,
            closed,
            timeout_ms,
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// POST one request to the announced endpoint and wait for the
    /// correlated response on the event stream. The deadline covers both
    /// legs, so a server that accepts the POST but never answers it cannot
    /// hang the caller.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("transport is closed".to_string()));
        }

        let timeout = Duration::from_millis(self.timeout_ms);
        match tokio::time::timeout(timeout, self.exchange(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout_ms,
            }),
        }
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        let pending = self.pending.register();
        let request = JsonRpcRequest::new(pending.id(), method, params);

        let response = self
            .http
            .post(&self.post_url)
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_send_error(&self.post_url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Transport(format!("HTTP {status}: {body}")));
        }

        pending
            .wait(method, Duration::from_millis(self.timeout_ms))
            .await
    }

    /// POST a fire-and-forget notification to the announced endpoint.
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
                .post(&self.post_url)
                .headers(self.headers.clone())
                .json(&notification)
                .send()
                .await
                .map_err(|e| classify_send_error(&self.post_url, e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Transport(format!("HTTP {status}: {body}")));
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

    /// Drop the event stream and cancel pending requests. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.fail_all(|| ClientError::Cancelled);
        self.reader_handle.abort();
    }
}

async fn wait_for_endpoint(reader: &mut EventReader) -> Result<String, ClientError> {
    while let Some(event) = reader.next_event().await {
        match event.event_type.as_deref() {
            Some(EVENT_ENDPOINT) => return Ok(event.data),
            other => {
                tracing::debug!("Ignoring pre-endpoint event {other:?}");
            }
        }
    }
    Err(ClientError::Protocol(
        "event stream closed before announcing an endpoint".to_string(),
    ))
}

/// Parse a message event and resolve the pending caller it correlates to.
fn dispatch_message(pending: &RequestMap, data: &str) {
    let resp: JsonRpcResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Failed to parse server message: {e}");
            return;
        }
    };
    match resp.id {
        Some(id) => {
            if !pending.complete(id, resp) {
                tracing::warn!("Dropping response with unrecognized id {id}");
            }
        }
        // Server-initiated notifications are currently ignored
        None => {}
    }
}

/// Resolve the endpoint announced by the server against the stream URL.
fn resolve_endpoint(base: &str, endpoint: &str) -> String {
    if endpoint.contains("://") {
        return endpoint.to_string();
    }
    let origin = base
        .find("://")
        .and_then(|scheme_end| {
            base[scheme_end + 3..]
                .find('/')
                .map(|path_start| &base[..scheme_end + 3 + path_start])
        })
        .unwrap_or_else(|| base.trim_end_matches('/'));
    if endpoint.starts_with('/') {
        format!("{origin}{endpoint}")
    } else {
        format!("{origin}/{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unanswered_post_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // First connection is the event stream: announce the endpoint and
        // stay open. The second is the POST, which is read and never
        // answered.
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\nevent: endpoint\ndata: /messages\n\n",
                )
                .await
                .unwrap();
            let (mut post, _) = listener.accept().await.unwrap();
            let _ = post.read(&mut buf).await;
            // Hold both sockets open so neither side sees a close.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop((stream, post));
        });

        let transport = SseTransport::connect(&format!("http://{addr}"), &HashMap::new(), 500)
            .await
            .unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.send_request("tools/list", None),
        )
        .await
        .expect("request must resolve within its deadline");
        match result.unwrap_err() {
            ClientError::Timeout { method, .. } => assert_eq!(method, "tools/list"),
            other => panic!("Expected Timeout, got: {other:?}"),
        }

        transport.close().await;
        server.abort();
    }

    #[test]
    fn resolve_absolute_endpoint() {
        assert_eq!(
            resolve_endpoint("https://a.example/sse/", "https://b.example/messages"),
            "https://b.example/messages"
        );
    }

    #[test]
    fn resolve_rooted_endpoint() {
        assert_eq!(
            resolve_endpoint("https://a.example/sse/", "/messages?session=abc"),
            "https://a.example/messages?session=abc"
        );
    }

    #[test]
    fn resolve_relative_endpoint() {
        assert_eq!(
            resolve_endpoint("https://a.example", "messages"),
            "https://a.example/messages"
        );
    }

    #[tokio::test]
    async fn dispatch_resolves_matching_caller() {
        let map = Arc::new(RequestMap::new());
        let pending = map.register();
        let id = pending.id();
        dispatch_message(
            &map,
            &format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{"ok":true}}}}"#),
        );
        let resp = pending
            .wait("test", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn dispatch_drops_unrecognized_id() {
        let map = Arc::new(RequestMap::new());
        // No pending caller registered; must not panic
        dispatch_message(&map, r#"{"jsonrpc":"2.0","id":42,"result":{}}"#);
        assert_eq!(map.inflight_count(), 0);
    }
}
