//! STOMP frame wire codec and transport envelope.
//!
//! The wire form of a frame is:
//!
//! ```text
//! COMMAND\n
//! key:value\n
//! ...
//! \n
//! body\0
//! ```
//!
//! The transport carries frames inside a JSON array of serialized frame
//! strings, prefixed by the multiplexed-transport discriminator byte that
//! the session engine strips before calling [`decode_envelope`].
//!
//! # Parser limits
//!
//! The header parser is deliberately narrow: a line is a header only when
//! splitting on `:` yields exactly two non-empty-after-trim parts, and the
//! first line that does not match terminates header parsing. Header values
//! containing a colon (timestamps, URLs) are therefore not representable —
//! a known, inherited limitation relied on downstream; do not widen it.

// ============================================================================
// Imports
// ============================================================================

use super::frame::Frame;
use crate::error::{Error, Result};

// ============================================================================
// Serialization
// ============================================================================

/// Serializes a frame to its wire text.
///
/// Headers are emitted in insertion order, followed by a blank line, the
/// body, and a single NUL terminator.
#[must_use]
pub fn serialize(frame: &Frame) -> String {
    let mut buffer = String::new();

    buffer.push_str(frame.command());
    buffer.push('\n');

    for (key, value) in frame.headers() {
        buffer.push_str(key);
        buffer.push(':');
        buffer.push_str(value);
        buffer.push('\n');
    }

    buffer.push('\n');
    buffer.push_str(frame.body());
    buffer.push('\0');
    buffer
}

// ============================================================================
// Deserialization
// ============================================================================

/// Deserializes wire text into a frame.
///
/// Empty input yields `None`. The first line is the command; lines up to the
/// first blank line are parsed as headers under the narrow rule documented
/// at module level; the rest is the body with trailing CR/LF/NUL trimmed.
#[must_use]
pub fn deserialize(text: &str) -> Option<Frame> {
    if text.is_empty() {
        return None;
    }

    let mut lines = text.split('\n');
    let command_line = lines.next().unwrap_or_default();
    let command = command_line.trim_end_matches('\r');

    let mut frame = Frame::new(command);
    let mut consumed = command_line.len() + 1;

    let mut accepting_headers = true;
    for line in lines.by_ref() {
        consumed += line.len() + 1;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if !accepting_headers {
            continue;
        }

        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            [key, value] if !key.trim().is_empty() && !value.trim().is_empty() => {
                frame.set_header(key.trim(), value.trim());
            }
            // Narrow parser: anything else ends header collection.
            _ => accepting_headers = false,
        }
    }

    let body = text
        .get(consumed..)
        .unwrap_or_default()
        .trim_end_matches(['\r', '\n', '\0']);
    frame.set_body(body);

    Some(frame)
}

// ============================================================================
// Transport Envelope
// ============================================================================

/// Wraps a single serialized frame in the JSON-array transport envelope.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails (it cannot for string
/// payloads, but the signature keeps the seam honest).
pub fn encode_envelope(frame: &Frame) -> Result<String> {
    Ok(serde_json::to_string(&[serialize(frame)])?)
}

/// Decodes the JSON-array transport envelope into serialized frame texts.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when the payload is not a JSON array of
/// strings; the caller drops the message and keeps the session alive.
pub fn decode_envelope(payload: &str) -> Result<Vec<String>> {
    let items: Vec<serde_json::Value> = serde_json::from_str(payload)
        .map_err(|e| Error::protocol(format!("envelope is not a JSON array: {e}")))?;

    let mut texts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            serde_json::Value::String(text) => texts.push(text),
            other => {
                return Err(Error::protocol(format!(
                    "envelope element is not a string: {other}"
                )));
            }
        }
    }
    Ok(texts)
}

// ============================================================================
// Tests
// ============================================================================
