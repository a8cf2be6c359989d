//! Server-Sent Events (SSE) parser.
//!
//! Incrementally turns response text into events per the W3C EventSource
//! format. Event blocks may be separated by LF or CRLF blank lines.

/// Event type a server uses to announce its POST endpoint.
pub const EVENT_ENDPOINT: &str = "endpoint";
/// Event type carrying a JSON-RPC message.
pub const EVENT_MESSAGE: &str = "message";

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

/// Incremental SSE parser that processes text chunks into events.
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed a chunk of text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(block) = self.take_block() {
            if let Some(event) = Self::parse_block(&block) {
                events.push(event);
            }
        }
        events
    }

    /// Split off the next block, if its terminating blank line has arrived.
    fn take_block(&mut self) -> Option<String> {
        let lf = self.buffer.find("\n\n").map(|pos| (pos, 2));
        let crlf = self.buffer.find("\r\n\r\n").map(|pos| (pos, 4));
        let (pos, sep_len) = match (lf, crlf) {
            (Some(lf), Some(crlf)) => std::cmp::min_by_key(lf, crlf, |(pos, _)| *pos),
            (Some(sep), None) | (None, Some(sep)) => sep,
            (None, None) => return None,
        };
        let block = self.buffer[..pos].to_string();
        self.buffer = self.buffer[pos + sep_len..].to_string();
        Some(block)
    }

    /// Parse the lines of one block into an event.
    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut data = String::new();
        let mut saw_data = false;

        for line in block.lines() {
            if line.starts_with(':') {
                // Comment line, skip
                continue;
            }
            let (field, value) = match line.split_once(':') {
                // One leading space after the colon is separator, not payload
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => {
                    if saw_data {
                        data.push('\n');
                    }
                    data.push_str(value);
                    saw_data = true;
                }
                // id, retry, and unknown fields are ignored
                _ => {}
            }
        }

        saw_data.then_some(SseEvent { event_type, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_event() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message\ndata: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.as_deref(), Some(EVENT_MESSAGE));
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
    }

    #[test]
    fn multiple_events() {
        let mut parser = SseParser::new();
        let events =
            parser.feed("event: endpoint\ndata: /messages\n\nevent: message\ndata: {}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type.as_deref(), Some(EVENT_ENDPOINT));
        assert_eq!(events[0].data, "/messages");
        assert_eq!(events[1].event_type.as_deref(), Some(EVENT_MESSAGE));
    }

    #[test]
    fn partial_event_across_chunks() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message\n");
        assert_eq!(events.len(), 0);
        let events = parser.feed("data: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.as_deref(), Some(EVENT_MESSAGE));
    }

    #[test]
    fn comment_lines_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\nevent: message\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn event_without_type() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: hello world\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].event_type.is_none());
        assert_eq!(events[0].data, "hello world");
    }

    #[test]
    fn multiline_data_joined_with_newlines() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: line one\ndata: line two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn crlf_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: endpoint\r\ndata: /messages?session=1\r\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "/messages?session=1");
    }

    #[test]
    fn crlf_separated_blocks() {
        let mut parser = SseParser::new();
        let events =
            parser.feed("event: endpoint\r\ndata: /messages?session=1\r\n\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type.as_deref(), Some(EVENT_ENDPOINT));
        assert_eq!(events[0].data, "/messages?session=1");
        assert_eq!(events[1].data, "{}");
    }
}
