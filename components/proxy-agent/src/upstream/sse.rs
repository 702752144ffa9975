//! Incremental parser for the server-sent-events line protocol.
//!
//! Both the event-stream RPC transport and the cache-invalidation listener
//! read long-lived `text/event-stream` bodies. This parser is fed raw body
//! chunks and emits complete events at each blank-line boundary, per the
//! WHATWG framing rules: `event:` names the event, `data:` lines accumulate
//! (joined with `\n`), `:` lines are comments, and an empty line dispatches.

// External crates
use bytes::Bytes;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name from the `event:` field; `None` means the unnamed
    /// default event type.
    pub event: Option<String>,
    /// Concatenated `data:` payload.
    pub data: String,
}

/// Streaming parser state. Feed chunks, collect events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns every event completed by it.
    pub fn feed(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            self.consume_line(line);
        }
        events
    }

    fn consume_line(&mut self, line: &str) {
        // Comment line
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data_lines.push(value.to_owned()),
            // `id` and `retry` are not used by this client
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }
}
