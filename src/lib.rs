//! console-link - Client-side realtime transport for a desktop console shell.
//!
//! This library maintains the single persistent duplex WebSocket connection
//! between a desktop application shell and its backend console service. The
//! core is [`ConnectionManager`]: a small state machine governing connection
//! lifecycle, timeout detection, message framing, and failure
//! classification.
//!
//! Key design principles:
//!
//! - One connection, exclusively owned: callers observe status and
//!   callbacks, never the raw stream
//! - No error crosses the public boundary: failures are recorded as
//!   last-error and surfaced through callbacks
//! - Fixed-shape outbound messages: arbitrary payloads are normalized
//!   before transmission, never passed through raw
//! - Structured-if-parseable inbound: frames that fail to parse degrade to
//!   raw-string delivery
//! - No built-in reconnection policy: `failed` is terminal until the
//!   caller drives a retry with `connect()`
//!
//! # Quick Start
//!
//! ```no_run
//! use console_link::{ConnectionManager, InboundMessage};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ConnectionManager::builder()
//!         .address("ws://127.0.0.1:8080/console")
//!         .credential("hunter2")
//!         .on_open(|| println!("console link up"))
//!         .on_connect_failed(|reason| eprintln!("link failed: {reason}"))
//!         .build();
//!
//!     manager.set_message_handler(|message: &InboundMessage| {
//!         println!("server: {message:?}");
//!     });
//!
//!     manager.connect();
//!     // ... once the open callback fires:
//!     manager.send(&json!({ "command": "ls" }));
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`transport`] | [`ConnectionManager`] state machine and connection |
//! | [`protocol`] | Outbound/inbound wire message types |
//! | [`options`] | Configuration surface and builder |
//! | [`bus`] | Publish/subscribe [`EventBus`] |
//! | [`error`] | Error types and [`Result`] alias |

// ============================================================================
// Modules
// ============================================================================

/// Publish/subscribe event bus for cross-component notification.
pub mod bus;

/// Error types and result aliases.
pub mod error;

/// Manager configuration: address/credential sources and callbacks.
pub mod options;

/// Wire message types.
pub mod protocol;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bus types
pub use bus::{EventBus, SubscriptionId};

// Error types
pub use error::{ABNORMAL_CLOSURE_CODE, Error, Result};

// Configuration types
pub use options::{
    DEFAULT_CONNECT_TIMEOUT, ErrorHandler, FailureHandler, LifecycleHandler, ManagerBuilder,
    MessageHandler, ValueSource,
};

// Protocol types
pub use protocol::{InboundMessage, OutboundMessage};

// Transport types
pub use transport::{ConnectionManager, ConnectionStatus, STATUS_TOPIC};
