//! Error types for the console-link transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! None of these errors ever cross the [`ConnectionManager`] public boundary:
//! the manager reports failures through its status field, its last-error
//! message, and its callbacks. The [`Error`] type exists for internal
//! propagation and as the payload of the error callback.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Establishment | [`Error::ConnectionTimeout`], [`Error::Connection`] |
//! | Closure | [`Error::ConnectionRefused`], [`Error::ConnectionClosed`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |
//!
//! [`ConnectionManager`]: crate::ConnectionManager

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Constants
// ============================================================================

/// Close code signifying the peer went away without a clean closing handshake.
///
/// A transport that closes with this code while still establishing is
/// indistinguishable from "server refused" vs. "network unreachable"; both
/// map to the same message.
pub const ABNORMAL_CLOSURE_CODE: u16 = 1006;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the transport target cannot be resolved, for example
    /// when the configured address resolves to an empty string.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Establishment Errors
    // ========================================================================
    /// Transport could not be constructed or reported an error.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Guard timer fired before the transport opened.
    #[error("connection timed out after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Closure Errors
    // ========================================================================
    /// Peer closed without a clean closing handshake while establishing.
    #[error("connection refused or network error")]
    ConnectionRefused,

    /// Transport closed with the given close code while establishing.
    #[error("connection closed (code: {code})")]
    ConnectionClosed {
        /// The close code the transport reported.
        code: u16,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates the closure error for a close code.
    ///
    /// The well-known abnormal-closure code maps to
    /// [`Error::ConnectionRefused`]; every other code maps to
    /// [`Error::ConnectionClosed`] carrying the code.
    #[inline]
    pub fn closed(code: u16) -> Self {
        if code == ABNORMAL_CLOSURE_CODE {
            Self::ConnectionRefused
        } else {
            Self::ConnectionClosed { code }
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionRefused
                | Self::ConnectionClosed { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on a later `connect()` call.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::Json(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("dial failed");
        assert_eq!(err.to_string(), "connection error: dial failed");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("websocket address not set");
        assert_eq!(
            err.to_string(),
            "configuration error: websocket address not set"
        );
    }

    #[test]
    fn test_closed_abnormal_code() {
        let err = Error::closed(ABNORMAL_CLOSURE_CODE);
        assert!(matches!(err, Error::ConnectionRefused));
        assert_eq!(err.to_string(), "connection refused or network error");
    }

    #[test]
    fn test_closed_other_code() {
        let err = Error::closed(1011);
        assert!(matches!(err, Error::ConnectionClosed { code: 1011 }));
        assert_eq!(err.to_string(), "connection closed (code: 1011)");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::connection_timeout(10_000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
        assert_eq!(
            timeout_err.to_string(),
            "connection timed out after 10000ms"
        );
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::connection_timeout(1000).is_connection_error());
        assert!(Error::closed(1006).is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::connection_timeout(1000).is_recoverable());
        assert!(Error::closed(1006).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
