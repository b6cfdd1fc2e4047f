//! STOMP frame value type.
//!
//! A frame is a command line, colon-delimited headers, a blank line, a body
//! and a NUL terminator on the wire. This module holds the in-memory
//! representation; [`codec`](super::codec) owns the wire form.

// ============================================================================
// Command Constants
// ============================================================================

/// STOMP command names used by the session layer.
pub mod command {
    /// Client handshake frame.
    pub const CONNECT: &str = "CONNECT";
    /// Server acknowledgement of CONNECT. Never confirms the session on its
    /// own; only an authenticated MESSAGE does.
    pub const CONNECTED: &str = "CONNECTED";
    /// Outbound application message.
    pub const SEND: &str = "SEND";
    /// Queue subscription frame.
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    /// Inbound application message.
    pub const MESSAGE: &str = "MESSAGE";
    /// Server-side failure report.
    pub const ERROR: &str = "ERROR";
}

// ============================================================================
// Frame
// ============================================================================

/// A STOMP frame: command, unique-key headers in insertion order, body.
///
/// Invariant: a `content-length` header is always present and equal to the
/// byte length of the body; every body mutation recomputes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Frame {
    /// Creates a frame with an empty body.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_body(command, "")
    }

    /// Creates a frame with the given body.
    #[must_use]
    pub fn with_body(command: impl Into<String>, body: impl Into<String>) -> Self {
        let mut frame = Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        };
        frame.set_body(body);
        frame
    }

    /// The frame command.
    #[inline]
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The frame body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Headers in insertion order.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Looks up a header value.
    ///
    /// A missing key yields the empty string, never an error.
    #[must_use]
    pub fn header(&self, key: &str) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map_or("", |(_, v)| v.as_str())
    }

    /// Returns `true` if the header is present.
    #[must_use]
    pub fn has_header(&self, key: &str) -> bool {
        self.headers.iter().any(|(k, _)| k == key)
    }

    /// Sets a header, replacing in place when the key already exists.
    ///
    /// Keys are unique; insertion order is the serialization order.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.headers.push((key, value)),
        }
        self
    }

    /// Builder-style [`set_header`](Self::set_header).
    #[must_use]
    pub fn header_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Replaces the body and recomputes `content-length`.
    pub fn set_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = body.into();
        let length = self.body.len().to_string();
        self.set_header("content-length", length);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
