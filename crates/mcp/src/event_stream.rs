//! Incremental `text/event-stream` decoder shared by the HTTP transports.

use crate::error::{McpTransportError, Result};

/// Longest single line accepted from a server before the stream is dropped.
pub(crate) const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// Event type, `message` when the server did not name one.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Feeds raw body chunks in, yields complete events out.
///
/// Lines may be split across chunks at any byte; only complete lines are
/// interpreted. A partial line longer than the limit fails the stream.
#[derive(Debug)]
pub(crate) struct EventStreamDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to contain no newline.
    scanned: usize,
    max_line: usize,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl EventStreamDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
            event: None,
            data: Vec::new(),
            id: None,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            self.scanned = 0;
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        self.scanned = self.buf.len();
        if self.buf.len() > self.max_line {
            self.buf.clear();
            self.scanned = 0;
            return Err(McpTransportError::Closed {
                reason: format!("event stream line exceeds {} bytes", self.max_line),
            }
            .into());
        }
        Ok(events)
    }

    /// Flush whatever is left once the stream has ended.
    pub(crate) fn finish(&mut self) -> Option<SseEvent> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {},
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".into()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        })
    }
}

/// Decode a complete event-stream body.
pub(crate) fn parse_body(body: &str) -> Result<Vec<SseEvent>> {
    let mut decoder = EventStreamDecoder::new();
    let mut events = decoder.push(body.as_bytes())?;
    events.extend(decoder.finish());
    Ok(events)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_event_and_default_type() {
        let events = parse_body("event: endpoint\ndata: /messages?s=1\n\ndata: {}\n\n").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?s=1");
        assert_eq!(events[1].event, "message");
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let events = parse_body(": keepalive\ndata: a\ndata: b\nid: 7\n\n").unwrap();
        assert_eq!(events, vec![SseEvent {
            event: "message".into(),
            data: "a\nb".into(),
            id: Some("7".into()),
        }]);
    }

    #[test]
    fn test_chunks_split_mid_line_and_crlf() {
        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.push(b"event: mess").unwrap().is_empty());
        assert!(decoder.push(b"age\r\ndata: {\"id\"").unwrap().is_empty());
        let events = decoder.push(b":1}\r\n\r\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"id":1}"#);
    }

    #[test]
    fn test_unterminated_event_is_flushed() {
        let events = parse_body("data: {\"jsonrpc\":\"2.0\"}").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_event_without_data_is_dropped() {
        assert!(parse_body("event: ping\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_overlong_line_fails_stream() {
        let mut decoder = EventStreamDecoder::with_max_line(16);
        assert!(decoder.push(b"data: 0123").unwrap().is_empty());
        let err = decoder.push(b"456789abcdef").unwrap_err();
        assert!(err.is_transport_closed(), "unexpected error: {err}");
    }

    #[test]
    fn test_long_line_split_across_chunks_within_limit() {
        let mut decoder = EventStreamDecoder::with_max_line(64);
        for _ in 0..5 {
            assert!(decoder.push(b"xxxxxxxx").unwrap().is_empty());
        }
        // A completed line resets the budget.
        let events = decoder.push(b"\ndata: ok\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
        assert!(decoder.push(&[b'y'; 60]).unwrap().is_empty());
    }
}
