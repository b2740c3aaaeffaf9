/**
 * Watch event model and the incremental decoder for watch response bodies
 */
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change carried by a [`WatchEvent`]
///
/// `Polled` never arrives over the wire; it marks events synthesized by the
/// enforcement sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
    Polled,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Bookmark => "BOOKMARK",
            Self::Error => "ERROR",
            Self::Polled => "POLLED",
        };
        f.write_str(name)
    }
}

/// A single change notification: `{"type": ..., "object": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub object: Value,
}

impl WatchEvent {
    #[must_use]
    pub const fn new(event_type: EventType, object: Value) -> Self {
        Self { event_type, object }
    }

    /// Event synthesized by a polling sweep for one listed item
    #[must_use]
    pub const fn polled(object: Value) -> Self {
        Self::new(EventType::Polled, object)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.event_type, EventType::Error)
    }

    /// `metadata.namespace/metadata.name` of the carried object, for logging
    #[must_use]
    pub fn object_ref(&self) -> String {
        let metadata = &self.object["metadata"];
        match (metadata["namespace"].as_str(), metadata["name"].as_str()) {
            (Some(ns), Some(name)) => format!("{ns}/{name}"),
            (None, Some(name)) => name.to_string(),
            _ => "<unnamed>".to_string(),
        }
    }
}

/// Splits a byte stream into consecutive JSON values.
///
/// Chunks may cut a value anywhere; incomplete trailing input is kept until the
/// next [`push`](Self::push). Values may be separated by newlines or simply
/// concatenated. Once a parse runs out of input, the buffer is parsed again only
/// after a newline arrives or [`finish`](Self::finish) is called.
#[derive(Debug, Default)]
pub struct JsonStreamDecoder {
    buf: BytesMut,
    /// Bytes known not to complete a value
    scanned: usize,
    finished: bool,
}

impl JsonStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Mark the end of input so a trailing value without a newline is parsed
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Next complete event, `Ok(None)` when more input is needed.
    ///
    /// # Errors
    ///
    /// Returns the parse error when the buffered input can never become a valid
    /// value, or when a complete value is not shaped like a watch event.
    pub fn next_event(&mut self) -> serde_json::Result<Option<WatchEvent>> {
        if self.scanned > 0 && !self.finished && !self.buf[self.scanned..].contains(&b'\n') {
            self.scanned = self.buf.len();
            return Ok(None);
        }
        let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => {
                let consumed = values.byte_offset();
                self.buf.advance(consumed);
                self.scanned = 0;
                serde_json::from_value(value).map(Some)
            }
            Some(Err(e)) if e.is_eof() => {
                self.scanned = self.buf.len();
                Ok(None)
            }
            Some(Err(e)) => Err(e),
            None => {
                // only whitespace left
                self.buf.clear();
                self.scanned = 0;
                Ok(None)
            }
        }
    }

    /// Whether non-whitespace input is still waiting for completion
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }
}
