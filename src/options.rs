//! Manager configuration: address/credential sources and callbacks.
//!
//! Provides a fluent builder for configuring and creating
//! [`ConnectionManager`] instances. The configuration is supplied once at
//! construction; the manager reports back exclusively through the callbacks
//! registered here and through its observable status fields.
//!
//! # Example
//!
//! ```no_run
//! use console_link::ConnectionManager;
//!
//! let manager = ConnectionManager::builder()
//!     .address("ws://127.0.0.1:8080/console")
//!     .credential_with(|| std::env::var("CONSOLE_PASSWORD").unwrap_or_default())
//!     .on_open(|| println!("console link up"))
//!     .on_connect_failed(|reason| eprintln!("link failed: {reason}"))
//!     .build();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::error::Error;
use crate::protocol::InboundMessage;
use crate::transport::ConnectionManager;

// ============================================================================
// Constants
// ============================================================================

/// Default guard-timer duration for connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Handler Aliases
// ============================================================================

/// Message handler callback type.
///
/// Called with every decoded-or-raw inbound frame. `Arc` so the dispatch
/// routine can read the current handler slot at delivery time without
/// holding a lock across the call.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Parameterless lifecycle callback type (connecting/open/close).
pub type LifecycleHandler = Box<dyn Fn() + Send + Sync>;

/// Failure callback type, invoked with the failure reason.
pub type FailureHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Error callback type, invoked with the transport-reported error.
pub type ErrorHandler = Box<dyn Fn(&Error) + Send + Sync>;

// ============================================================================
// ValueSource
// ============================================================================

/// A configuration value supplied either statically or as a zero-argument
/// resolver invoked at `connect()` time.
///
/// The resolver form lets the caller compute a fresh address or credential
/// per attempt.
pub enum ValueSource {
    /// Fixed value.
    Static(String),
    /// Resolver invoked per attempt.
    Resolver(Box<dyn Fn() -> String + Send + Sync>),
}

impl ValueSource {
    /// Resolves the current value.
    #[must_use]
    pub fn resolve(&self) -> String {
        match self {
            Self::Static(value) => value.clone(),
            Self::Resolver(resolver) => resolver(),
        }
    }
}

impl From<&str> for ValueSource {
    fn from(value: &str) -> Self {
        Self::Static(value.to_string())
    }
}

impl From<String> for ValueSource {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Lifecycle callback set, each optional.
#[derive(Default)]
pub(crate) struct Callbacks {
    /// Invoked with every inbound frame (in addition to the primary slot).
    pub(crate) on_message: Option<MessageHandler>,
    /// Invoked on successful open.
    pub(crate) on_open: Option<LifecycleHandler>,
    /// Invoked when the transport closes, clean or not.
    pub(crate) on_close: Option<LifecycleHandler>,
    /// Invoked on a transport-reported error.
    pub(crate) on_error: Option<ErrorHandler>,
    /// Invoked when an establishment attempt starts.
    pub(crate) on_connecting: Option<LifecycleHandler>,
    /// Invoked with the reason when an attempt or connection fails.
    pub(crate) on_connect_failed: Option<FailureHandler>,
}

// ============================================================================
// ManagerOptions
// ============================================================================

/// Resolved configuration consumed by the manager at construction.
pub(crate) struct ManagerOptions {
    /// Target address source.
    pub(crate) address: Option<ValueSource>,
    /// Optional credential source, appended as a query parameter.
    pub(crate) credential: Option<ValueSource>,
    /// Guard-timer duration for establishment.
    pub(crate) connect_timeout: Duration,
    /// Lifecycle callbacks.
    pub(crate) callbacks: Callbacks,
    /// Optional bus receiving status-transition events.
    pub(crate) bus: Option<Arc<EventBus>>,
}

// ============================================================================
// ManagerBuilder
// ============================================================================

/// Builder for configuring a [`ConnectionManager`] instance.
///
/// Use [`ConnectionManager::builder()`] to create a new builder. Building
/// never fails: a missing or empty address is reported at `connect()` time
/// through the failure callback, not as a construction error.
#[must_use]
pub struct ManagerBuilder {
    address: Option<ValueSource>,
    credential: Option<ValueSource>,
    connect_timeout: Duration,
    callbacks: Callbacks,
    bus: Option<Arc<EventBus>>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    pub fn new() -> Self {
        Self {
            address: None,
            credential: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            callbacks: Callbacks::default(),
            bus: None,
        }
    }

    /// Sets a static target address.
    ///
    /// # Arguments
    ///
    /// * `address` - WebSocket URL (e.g., "ws://127.0.0.1:8080/console")
    #[inline]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(ValueSource::Static(address.into()));
        self
    }

    /// Sets an address resolver invoked per `connect()` attempt.
    #[inline]
    pub fn address_with<F>(mut self, resolver: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.address = Some(ValueSource::Resolver(Box::new(resolver)));
        self
    }

    /// Sets a static credential, appended percent-encoded as the
    /// `password` query parameter.
    #[inline]
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(ValueSource::Static(credential.into()));
        self
    }

    /// Sets a credential resolver invoked per `connect()` attempt.
    #[inline]
    pub fn credential_with<F>(mut self, resolver: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.credential = Some(ValueSource::Resolver(Box::new(resolver)));
        self
    }

    /// Overrides the guard-timer duration (default 10s).
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the configured message handler.
    ///
    /// This handler is invoked for every inbound frame, in addition to the
    /// primary handler slot settable on the manager; both are invoked for
    /// every message.
    #[inline]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.callbacks.on_message = Some(Arc::new(handler));
        self
    }

    /// Sets the open callback.
    #[inline]
    pub fn on_open<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Box::new(callback));
        self
    }

    /// Sets the close callback.
    #[inline]
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Box::new(callback));
        self
    }

    /// Sets the transport-error callback.
    #[inline]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Box::new(callback));
        self
    }

    /// Sets the connecting callback.
    #[inline]
    pub fn on_connecting<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_connecting = Some(Box::new(callback));
        self
    }

    /// Sets the connect-failed callback.
    #[inline]
    pub fn on_connect_failed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_connect_failed = Some(Box::new(callback));
        self
    }

    /// Attaches an event bus; every status transition is published to the
    /// [`STATUS_TOPIC`] topic.
    ///
    /// [`STATUS_TOPIC`]: crate::STATUS_TOPIC
    #[inline]
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Builds the manager.
    #[must_use = "the manager does nothing until connect() is called"]
    pub fn build(self) -> ConnectionManager {
        ConnectionManager::from_options(ManagerOptions {
            address: self.address,
            credential: self.credential,
            connect_timeout: self.connect_timeout,
            callbacks: self.callbacks,
            bus: self.bus,
        })
    }
}

impl fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("address", &self.address)
            .field("has_credential", &self.credential.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_resolves_value() {
        let source = ValueSource::from("ws://localhost:9000");
        assert_eq!(source.resolve(), "ws://localhost:9000");
    }

    #[test]
    fn test_resolver_source_computes_fresh_value() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let counter = Arc::new(AtomicU32::new(0));
        let resolver = {
            let counter = Arc::clone(&counter);
            ValueSource::Resolver(Box::new(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                format!("ws://localhost:{}", 9000 + n)
            }))
        };

        assert_eq!(resolver.resolve(), "ws://localhost:9000");
        assert_eq!(resolver.resolve(), "ws://localhost:9001");
    }

    #[test]
    fn test_builder_defaults() {
        let builder = ManagerBuilder::new();
        assert!(builder.address.is_none());
        assert!(builder.credential.is_none());
        assert_eq!(builder.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_builder_sets_sources() {
        let builder = ManagerBuilder::new()
            .address("ws://localhost:9000")
            .credential("hunter2")
            .connect_timeout(Duration::from_millis(250));

        assert!(matches!(builder.address, Some(ValueSource::Static(_))));
        assert!(builder.credential.is_some());
        assert_eq!(builder.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_value_source_debug() {
        let fixed = ValueSource::from("ws://x");
        let resolver = ValueSource::Resolver(Box::new(String::new));

        assert!(format!("{fixed:?}").contains("ws://x"));
        assert_eq!(format!("{resolver:?}"), "Resolver(..)");
    }
}
