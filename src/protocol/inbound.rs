//! Inbound message type.
//!
//! Defines the decoded payload of a received frame. Inbound data is parsed
//! as JSON; a frame that fails to parse degrades gracefully to raw-string
//! delivery and is never treated as an error.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

// ============================================================================
// InboundMessage
// ============================================================================

/// Decoded payload of a received frame.
///
/// No schema is enforced on inbound data beyond "structured-if-parseable":
/// handlers receive either the parsed JSON value or the untouched raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Frame parsed as structured JSON.
    Json(Value),
    /// Frame delivered as the literal raw string.
    Text(String),
}

impl InboundMessage {
    /// Decodes a raw frame payload.
    ///
    /// Attempts a structured decode; on failure the raw payload is passed
    /// through unchanged.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(raw.to_string()),
        }
    }

    /// Returns `true` if the frame parsed as structured data.
    #[inline]
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    /// Returns the structured value, if any.
    #[inline]
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Returns the raw text, if the frame did not parse.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }

    /// Gets a string field from a structured frame.
    ///
    /// Returns empty string for raw frames or missing/non-string keys.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.as_json()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_decode_structured_frame() {
        let msg = InboundMessage::decode(r#"{"output":"done","status":"ok"}"#);

        assert!(msg.is_structured());
        assert_eq!(msg.as_json(), Some(&json!({"output": "done", "status": "ok"})));
        assert_eq!(msg.get_string("output"), "done");
    }

    #[test]
    fn test_decode_invalid_syntax_passes_raw_through() {
        let msg = InboundMessage::decode("not json");

        assert!(!msg.is_structured());
        assert_eq!(msg.as_text(), Some("not json"));
        assert_eq!(msg, InboundMessage::Text("not json".to_string()));
    }

    #[test]
    fn test_decode_bare_json_scalar_is_structured() {
        // bare scalars are valid JSON documents
        let msg = InboundMessage::decode("42");
        assert_eq!(msg.as_json(), Some(&json!(42)));
    }

    #[test]
    fn test_get_string_on_raw_frame() {
        let msg = InboundMessage::decode("plain text line");
        assert_eq!(msg.get_string("output"), "");
    }
}
