//! Outbound message type.
//!
//! Defines the fixed-shape record transmitted to the backend console
//! service and the normalization contract that coerces arbitrary caller
//! payloads into that shape.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// OutboundMessage
// ============================================================================

/// A fixed-shape console message sent from client to server.
///
/// All five keys are always present on the wire; fields missing from the
/// caller's payload default to the empty string. Arbitrary caller payloads
/// are coerced into this shape before transmission, never passed through
/// raw.
///
/// # Format
///
/// ```json
/// {
///   "command": "ls",
///   "content": "",
///   "output": "",
///   "error": "",
///   "status": ""
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Command verb for the server to execute.
    #[serde(default)]
    pub command: String,

    /// Command payload or free-form content.
    #[serde(default)]
    pub content: String,

    /// Output text (echoed records reuse the same shape).
    #[serde(default)]
    pub output: String,

    /// Error text.
    #[serde(default)]
    pub error: String,

    /// Status text.
    #[serde(default)]
    pub status: String,
}

impl OutboundMessage {
    /// Creates a message carrying only a command verb.
    #[inline]
    #[must_use]
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Normalizes an arbitrary caller payload into the fixed shape.
    ///
    /// String fields are taken by key from the payload; anything missing,
    /// non-string, or non-object defaults to the empty string. The call
    /// never rejects a payload.
    #[must_use]
    pub fn from_value(payload: &Value) -> Self {
        let field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Self {
            command: field("command"),
            content: field("content"),
            output: field("output"),
            error: field("error"),
            status: field("status"),
        }
    }

    /// Returns `true` if every field is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.command.is_empty()
            && self.content.is_empty()
            && self.output.is_empty()
            && self.error.is_empty()
            && self.status.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
