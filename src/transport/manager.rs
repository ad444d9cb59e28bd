//! Connection manager and lifecycle state machine.
//!
//! This module implements the core of the crate: a small state machine
//! governing connection lifecycle, timeout detection, message framing, and
//! failure classification.
//!
//! # State Machine
//!
//! ```text
//! disconnected ──connect()──► connecting ──open──► connected
//!      ▲                         │    │               │  │
//!      │                 timeout/│    │close          │  │clean close
//!      │                  error  ▼    ▼               │  ▼
//!      │                        failed ◄──error───────┘ disconnected
//!      │                         │
//!      └──────disconnect()───────┴──connect() retries
//! ```
//!
//! All transitions occur as reactions to an explicit call from the caller,
//! a transport lifecycle event, or the guard timer firing. Failure
//! classification is purely code/state-derived; no payload inspection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{ABNORMAL_CLOSURE_CODE, Error, Result};
use crate::options::{ManagerBuilder, ManagerOptions, MessageHandler};
use crate::protocol::{InboundMessage, OutboundMessage};

use super::connection::Connection;
use super::status::ConnectionStatus;

// ============================================================================
// Constants
// ============================================================================

/// Bus topic receiving status-transition events when a bus is configured.
pub const STATUS_TOPIC: &str = "connection.status";

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owns one transport connection, a status variable, and the glue for
/// encoding outbound messages and decoding inbound ones.
///
/// Configured once via [`ConnectionManager::builder()`]; reports back to
/// the caller exclusively through the configured callbacks and through the
/// observable [`status`](Self::status) and
/// [`last_error`](Self::last_error) fields. No method ever returns an
/// error: every failure is recorded as last-error, surfaced via the
/// failure or error callback, and leaves the manager in a state from which
/// [`connect`](Self::connect) can be retried.
///
/// Cloning is cheap and yields a handle to the same manager.
///
/// # Example
///
/// ```no_run
/// use console_link::ConnectionManager;
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() {
///     let manager = ConnectionManager::builder()
///         .address("ws://127.0.0.1:8080/console")
///         .on_open(|| println!("link up"))
///         .build();
///
///     manager.connect();
///     // ... once connected:
///     manager.send(&json!({ "command": "ls" }));
/// }
/// ```
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ConnectionManager {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Creates a manager from resolved options.
    pub(crate) fn from_options(options: ManagerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                status: Mutex::new(ConnectionStatus::Disconnected),
                last_error: Mutex::new(None),
                connection: Mutex::new(None),
                handler: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Starts a connection attempt.
    ///
    /// No-op while an attempt is already in flight. Any existing connection
    /// is closed and released first; its late events cannot re-drive the
    /// state machine. Resolution of the address and credential happens per
    /// attempt, so resolver-backed configuration yields a fresh target each
    /// time.
    ///
    /// Must be called from within a tokio runtime: establishment and the
    /// guard timer run on a spawned task.
    pub fn connect(&self) {
        let shared = &self.shared;

        debug!(status = %shared.status(), "connect requested");
        if shared.status().is_connecting() {
            debug!("connect ignored: attempt already in flight");
            return;
        }

        // Tear down any previous connection. The generation bump detaches
        // its close event so the old handle cannot short-circuit the new
        // attempt; status is left untouched across the teardown.
        shared.detach_connection();

        let address = match &shared.options.address {
            Some(source) => source.resolve(),
            None => String::new(),
        };
        if address.is_empty() {
            shared.fail_attempt(&Error::config("websocket address not set").to_string());
            return;
        }

        let generation = shared.next_generation();
        shared.clear_last_error();
        shared.set_status(ConnectionStatus::Connecting);
        shared.invoke_connecting();

        let target = match shared.build_target(address) {
            Ok(target) => target,
            Err(e) => {
                // the transport could not even be constructed
                shared.fail_attempt(&format!("failed to create websocket connection: {e}"));
                return;
            }
        };

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            shared.run_attempt(generation, target).await;
        });
    }

    /// Closes and releases any open connection.
    ///
    /// Idempotent. Forces status to `disconnected` and clears last-error.
    /// A stale transport's close event cannot re-drive the state machine
    /// afterwards.
    pub fn disconnect(&self) {
        let shared = &self.shared;

        debug!(status = %shared.status(), "disconnect requested");
        shared.detach_connection();
        shared.clear_last_error();
        shared.set_status(ConnectionStatus::Disconnected);
    }

    /// Normalizes an arbitrary payload into the outbound shape and
    /// transmits it.
    ///
    /// Missing fields default to the empty string; the payload is never
    /// rejected for missing fields. Requires status `connected`: otherwise
    /// the call is dropped silently at the boundary (logged, never an
    /// error) and no data is sent.
    pub fn send(&self, payload: &Value) {
        self.send_message(OutboundMessage::from_value(payload));
    }

    /// Transmits an already-shaped outbound message.
    ///
    /// Same precondition as [`send`](Self::send).
    pub fn send_message(&self, message: OutboundMessage) {
        let shared = &self.shared;

        let status = shared.status();
        if !status.is_connected() {
            warn!(%status, "dropping outbound message: not connected");
            return;
        }

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to encode outbound message");
                return;
            }
        };

        let connection = shared.connection.lock().clone();
        match connection {
            Some(connection) => {
                trace!(command = %message.command, "outbound message queued");
                connection.send_text(text);
            }
            None => warn!("dropping outbound message: no live connection"),
        }
    }

    /// Replaces the primary message handler.
    ///
    /// The handler slot is read at delivery time, so replacement
    /// immediately rebinds delivery for all future inbound frames, even on
    /// an already-open connection. Both this handler and the configured
    /// one (if any) are invoked for every message.
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        *self.shared.handler.lock() = Some(Arc::new(handler));
        debug!("primary message handler replaced");
    }

    /// Empties the primary message handler slot.
    pub fn clear_message_handler(&self) {
        *self.shared.handler.lock() = None;
    }

    /// Returns the current connection status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Returns the last failure message, if any.
    #[inline]
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Returns `true` if the transport is open and ready to send.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .field("last_error", &self.last_error())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the manager handle and connection event loops.
pub(crate) struct Shared {
    /// Configuration, immutable after construction.
    options: ManagerOptions,
    /// Current lifecycle status.
    status: Mutex<ConnectionStatus>,
    /// Last failure message.
    last_error: Mutex<Option<String>>,
    /// The live transport handle, if any.
    connection: Mutex<Option<Connection>>,
    /// Primary message handler slot, read at delivery time.
    handler: Mutex<Option<MessageHandler>>,
    /// Attempt counter; events carrying a stale generation are ignored.
    generation: AtomicU64,
}

// ============================================================================
// Shared - Establishment
// ============================================================================

impl Shared {
    /// Dials the target under the guard timer and, on open, installs the
    /// connection and its event loop.
    async fn run_attempt(self: Arc<Self>, generation: u64, target: String) {
        debug!(generation, "dialing websocket");

        match timeout(self.options.connect_timeout, connect_async(target.as_str())).await {
            // Guard timer fired while still establishing. Dropping the
            // dial future closes the half-open transport.
            Err(_) => {
                if !self.is_current(generation) {
                    return;
                }
                let timeout_ms = self.options.connect_timeout.as_millis() as u64;
                self.fail_attempt(&Error::connection_timeout(timeout_ms).to_string());
            }

            Ok(Err(e)) => {
                if !self.is_current(generation) {
                    return;
                }
                match e {
                    WsError::Url(_) => {
                        self.fail_attempt(&format!("failed to create websocket connection: {e}"));
                    }
                    _ => {
                        // a refused or unreachable peer surfaces as a dial
                        // error; classified like an abnormal closure during
                        // establishment
                        debug!(error = %e, "dial failed");
                        self.handle_close(generation, ABNORMAL_CLOSURE_CODE);
                    }
                }
            }

            Ok(Ok((ws_stream, _response))) => {
                if !self.is_current(generation) {
                    debug!(generation, "open for superseded attempt, dropping stream");
                    return;
                }

                self.clear_last_error();
                self.set_status(ConnectionStatus::Connected);

                // status first, slot filled under the lock: an immediate
                // close from the event loop blocks on the slot and then
                // observes `connected`, so it classifies as a clean close
                {
                    let mut slot = self.connection.lock();
                    *slot = Some(Connection::spawn(ws_stream, Arc::clone(&self), generation));
                }

                info!(generation, "websocket connected");
                self.invoke_open();
            }
        }
    }

    /// Builds the dial target: resolves the optional credential and, when
    /// non-empty, appends it percent-encoded as the `password` query
    /// parameter.
    fn build_target(&self, mut address: String) -> Result<String> {
        if let Some(credential) = &self.options.credential {
            let credential = credential.resolve();
            if !credential.is_empty() {
                let separator = if address.contains('?') { '&' } else { '?' };
                address.push(separator);
                address.push_str("password=");
                address.push_str(&urlencoding::encode(&credential));
            }
        }

        Url::parse(&address).map_err(|e| Error::connection(e.to_string()))?;
        Ok(address)
    }
}

// ============================================================================
// Shared - Transport Events
// ============================================================================

impl Shared {
    /// Delivers an inbound frame to every registered handler.
    ///
    /// Both the primary slot handler and the configured handler are
    /// invoked for every message; this is a deliberate fan-out, not a
    /// fallback chain.
    pub(crate) fn dispatch_inbound(&self, generation: u64, raw: &str) {
        if !self.is_current(generation) {
            trace!(generation, "frame from superseded connection ignored");
            return;
        }

        let message = InboundMessage::decode(raw);
        trace!(
            structured = message.is_structured(),
            len = raw.len(),
            "inbound frame"
        );

        let primary = self.handler.lock().clone();
        if let Some(handler) = primary {
            handler(&message);
        }
        if let Some(handler) = &self.options.callbacks.on_message {
            handler(&message);
        }
    }

    /// Handles a transport close event.
    ///
    /// State at close time is the primary discriminant, not the code: a
    /// close while still `connecting` is a failed attempt classified by
    /// the close code; a close in any other state is a normal closure.
    pub(crate) fn handle_close(&self, generation: u64, code: u16) {
        if !self.is_current(generation) {
            trace!(generation, code, "close event from superseded connection ignored");
            return;
        }

        self.connection.lock().take();

        if self.status().is_connecting() {
            self.fail_attempt(&Error::closed(code).to_string());
        } else {
            debug!(code, "websocket closed normally");
            self.set_status(ConnectionStatus::Disconnected);
        }

        self.invoke_close();
    }

    /// Handles a transport-reported error event.
    pub(crate) fn handle_transport_error(&self, generation: u64, ws_error: WsError) {
        if !self.is_current(generation) {
            trace!(generation, "error event from superseded connection ignored");
            return;
        }

        self.connection.lock().take();

        let transport_error = Error::WebSocket(ws_error);
        error!(error = %transport_error, "websocket transport error");

        self.invoke_error(&transport_error);
        self.fail_attempt("websocket connection error");
    }
}

// ============================================================================
// Shared - State Helpers
// ============================================================================

impl Shared {
    fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    /// Records a failure: last-error, status `failed`, failure callback.
    fn fail_attempt(&self, message: &str) {
        warn!(error = message, "connection attempt failed");

        *self.last_error.lock() = Some(message.to_string());
        self.set_status(ConnectionStatus::Failed);
        self.invoke_connect_failed(message);
    }

    /// Updates the status and publishes the transition to the bus, if one
    /// is configured.
    fn set_status(&self, status: ConnectionStatus) {
        let previous = {
            let mut current = self.status.lock();
            std::mem::replace(&mut *current, status)
        };

        if previous == status {
            return;
        }
        debug!(from = %previous, to = %status, "status changed");

        if let Some(bus) = &self.options.bus {
            let payload = json!({
                "status": status.as_str(),
                "error": self.last_error.lock().clone(),
            });
            bus.publish(STATUS_TOPIC, &payload);
        }
    }

    fn clear_last_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Detaches and closes the current connection, if any.
    ///
    /// Bumping the generation first guarantees that any event still in
    /// flight from the old connection is ignored.
    fn detach_connection(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(connection) = self.connection.lock().take() {
            debug!("closing superseded connection");
            connection.shutdown();
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

// ============================================================================
// Shared - Callbacks
// ============================================================================

/// Callback invocations. All of these run with no internal lock held, so a
/// callback may re-enter the manager (including calling `connect()` again).
impl Shared {
    fn invoke_connecting(&self) {
        if let Some(callback) = &self.options.callbacks.on_connecting {
            callback();
        }
    }

    fn invoke_open(&self) {
        if let Some(callback) = &self.options.callbacks.on_open {
            callback();
        }
    }

    fn invoke_close(&self) {
        if let Some(callback) = &self.options.callbacks.on_close {
            callback();
        }
    }

    fn invoke_error(&self, transport_error: &Error) {
        if let Some(callback) = &self.options.callbacks.on_error {
            callback(transport_error);
        }
    }

    fn invoke_connect_failed(&self, reason: &str) {
        if let Some(callback) = &self.options.callbacks.on_connect_failed {
            callback(reason);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use crate::bus::EventBus;

    /// Binds a listener on a random loopback port and returns it with the
    /// matching ws:// URL.
    async fn bind_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("local addr"));
        (listener, url)
    }

    /// Polls a condition for up to two seconds.
    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 2s");
    }

    async fn wait_for_status(manager: &ConnectionManager, status: ConnectionStatus) {
        wait_until(|| manager.status() == status).await;
    }

    #[tokio::test]
    async fn test_initial_state() {
        let manager = ConnectionManager::builder().address("ws://127.0.0.1:1").build();

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.last_error(), None);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_connect_without_address_fails_immediately() {
        let reason = Arc::new(Mutex::new(None));
        let reason_slot = Arc::clone(&reason);

        let manager = ConnectionManager::builder()
            .on_connect_failed(move |r| *reason_slot.lock() = Some(r.to_string()))
            .build();

        manager.connect();

        assert_eq!(manager.status(), ConnectionStatus::Failed);
        let message = manager.last_error().expect("last error set");
        assert!(message.contains("address not set"), "got: {message}");
        assert_eq!(reason.lock().as_deref(), Some(message.as_str()));
    }

    #[tokio::test]
    async fn test_connect_with_empty_resolved_address_fails_immediately() {
        let manager = ConnectionManager::builder()
            .address_with(String::new)
            .build();

        manager.connect();

        assert_eq!(manager.status(), ConnectionStatus::Failed);
    }

    #[tokio::test]
    async fn test_connect_success_reports_connected() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            // keep the connection open until the client goes away
            while ws.next().await.is_some() {}
        });

        let connecting_seen = Arc::new(AtomicBool::new(false));
        let opened = Arc::new(AtomicBool::new(false));

        let connecting_flag = Arc::clone(&connecting_seen);
        let opened_flag = Arc::clone(&opened);
        let manager = ConnectionManager::builder()
            .address(url)
            .on_connecting(move || connecting_flag.store(true, Ordering::SeqCst))
            .on_open(move || opened_flag.store(true, Ordering::SeqCst))
            .build();

        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Connected).await;

        assert!(connecting_seen.load(Ordering::SeqCst));
        assert!(opened.load(Ordering::SeqCst));
        assert!(manager.is_connected());
        assert_eq!(manager.last_error(), None);
    }

    #[tokio::test]
    async fn test_guard_timer_inert_after_open() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while ws.next().await.is_some() {}
        });

        let manager = ConnectionManager::builder()
            .address(url)
            .connect_timeout(Duration::from_millis(200))
            .build();

        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Connected).await;

        // well past the guard duration; a late firing must have no effect
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_credential_appended_percent_encoded() {
        use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

        let (listener, url) = bind_server().await;
        let (uri_tx, uri_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let callback = move |req: &Request, resp: Response| {
                let _ = uri_tx.send(req.uri().to_string());
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .expect("upgrade");
            while ws.next().await.is_some() {}
        });

        let manager = ConnectionManager::builder()
            .address(url)
            .credential("p@ss word")
            .build();

        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Connected).await;

        let uri = uri_rx.await.expect("captured request uri");
        assert!(uri.ends_with("?password=p%40ss%20word"), "got: {uri}");
    }

    #[tokio::test]
    async fn test_credential_keeps_existing_query() {
        let shared = Shared {
            options: crate::options::ManagerOptions {
                address: None,
                credential: Some(crate::options::ValueSource::from("secret")),
                connect_timeout: Duration::from_secs(1),
                callbacks: Default::default(),
                bus: None,
            },
            status: Mutex::new(ConnectionStatus::Disconnected),
            last_error: Mutex::new(None),
            connection: Mutex::new(None),
            handler: Mutex::new(None),
            generation: AtomicU64::new(0),
        };

        let target = shared
            .build_target("ws://127.0.0.1:9000/console?session=2".to_string())
            .expect("valid target");
        assert_eq!(target, "ws://127.0.0.1:9000/console?session=2&password=secret");
    }

    #[tokio::test]
    async fn test_connect_while_connecting_is_noop() {
        // a listener that accepts TCP but never completes the websocket
        // handshake keeps the attempt in `connecting`
        let (listener, url) = bind_server().await;
        let accepted = Arc::new(AtomicUsize::new(0));

        let accept_count = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.expect("accept");
                accept_count.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        let manager = ConnectionManager::builder()
            .address(url)
            .connect_timeout(Duration::from_secs(5))
            .build();

        manager.connect();
        wait_until(|| accepted.load(Ordering::SeqCst) == 1).await;
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        manager.connect();
        manager.connect();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // no second transport was dialed
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_establishment_timeout_closes_half_open_attempt() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.expect("accept");
                held.push(stream);
            }
        });

        let reason = Arc::new(Mutex::new(None));
        let reason_slot = Arc::clone(&reason);
        let manager = ConnectionManager::builder()
            .address(url)
            .connect_timeout(Duration::from_millis(150))
            .on_connect_failed(move |r| *reason_slot.lock() = Some(r.to_string()))
            .build();

        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Failed).await;

        let message = manager.last_error().expect("last error set");
        assert!(message.contains("timed out"), "got: {message}");
        assert_eq!(reason.lock().as_deref(), Some(message.as_str()));
    }

    #[tokio::test]
    async fn test_refused_dial_maps_to_abnormal_closure_message() {
        // grab a port with no listener behind it
        let (listener, url) = bind_server().await;
        drop(listener);

        let manager = ConnectionManager::builder().address(url).build();

        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Failed).await;

        assert_eq!(
            manager.last_error().as_deref(),
            Some("connection refused or network error")
        );
    }

    #[tokio::test]
    async fn test_clean_close_while_connected_goes_disconnected() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            })))
            .await
            .expect("send close");
        });

        let closed = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let closed_flag = Arc::clone(&closed);
        let failed_flag = Arc::clone(&failed);
        let manager = ConnectionManager::builder()
            .address(url)
            .on_close(move || closed_flag.store(true, Ordering::SeqCst))
            .on_connect_failed(move |_| failed_flag.store(true, Ordering::SeqCst))
            .build();

        manager.connect();
        // the close may land right after open; only the terminal state is
        // observable without racing the event loop
        wait_for_status(&manager, ConnectionStatus::Disconnected).await;

        assert!(closed.load(Ordering::SeqCst));
        // a clean closure is not a failure
        assert!(!failed.load(Ordering::SeqCst));
        assert_eq!(manager.last_error(), None);
    }

    #[tokio::test]
    async fn test_send_normalizes_payload_on_the_wire() {
        let (listener, url) = bind_server().await;
        let (frame_tx, frame_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = frame_tx.send(text.to_string());
            }
        });

        let manager = ConnectionManager::builder().address(url).build();
        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Connected).await;

        manager.send(&json!({ "command": "ls" }));

        let frame = frame_rx.await.expect("server received frame");
        assert_eq!(
            frame,
            r#"{"command":"ls","content":"","output":"","error":"","status":""}"#
        );
    }

    #[tokio::test]
    async fn test_send_while_not_connected_is_dropped_silently() {
        let manager = ConnectionManager::builder().address("ws://127.0.0.1:1").build();

        // must neither panic nor change state
        manager.send(&json!({ "command": "ls" }));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_inbound_fanout_and_raw_string_delivery() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            ws.send(Message::Text("not json".into())).await.expect("send");
            while ws.next().await.is_some() {}
        });

        let configured = Arc::new(Mutex::new(Vec::new()));
        let primary = Arc::new(Mutex::new(Vec::new()));

        let configured_log = Arc::clone(&configured);
        let manager = ConnectionManager::builder()
            .address(url)
            .on_message(move |m| configured_log.lock().push(m.clone()))
            .build();

        let primary_log = Arc::clone(&primary);
        manager.set_message_handler(move |m| primary_log.lock().push(m.clone()));

        manager.connect();
        wait_until(|| !configured.lock().is_empty() && !primary.lock().is_empty()).await;

        // both handlers see the frame, delivered as the literal raw string
        let expected = InboundMessage::Text("not json".to_string());
        assert_eq!(configured.lock().first(), Some(&expected));
        assert_eq!(primary.lock().first(), Some(&expected));
    }

    #[tokio::test]
    async fn test_replacing_handler_rebinds_live_delivery() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            ws.send(Message::Text(r#"{"output":"one"}"#.into()))
                .await
                .expect("send first");
            // wait for the client's go-ahead before the second frame
            let _ = ws.next().await;
            ws.send(Message::Text(r#"{"output":"two"}"#.into()))
                .await
                .expect("send second");
            while ws.next().await.is_some() {}
        });

        let first_log = Arc::new(Mutex::new(Vec::new()));
        let second_log = Arc::new(Mutex::new(Vec::new()));

        let manager = ConnectionManager::builder().address(url).build();

        let log = Arc::clone(&first_log);
        manager.set_message_handler(move |m| log.lock().push(m.get_string("output")));

        manager.connect();
        wait_until(|| !first_log.lock().is_empty()).await;

        // swap the consumer while the connection stays live
        let log = Arc::clone(&second_log);
        manager.set_message_handler(move |m| log.lock().push(m.get_string("output")));
        manager.send(&json!({ "command": "next" }));

        wait_until(|| !second_log.lock().is_empty()).await;
        assert_eq!(*first_log.lock(), vec!["one"]);
        assert_eq!(*second_log.lock(), vec!["two"]);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while ws.next().await.is_some() {}
        });

        let manager = ConnectionManager::builder().address(url).build();
        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Connected).await;

        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.last_error(), None);

        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_is_terminal_until_retry() {
        let (listener, url) = bind_server().await;
        drop(listener);

        let manager = ConnectionManager::builder().address(url.clone()).build();
        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Failed).await;

        // still failed until the caller drives a retry
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.status(), ConnectionStatus::Failed);

        // bring a server up on the same port and retry
        let listener = TcpListener::bind(url.trim_start_matches("ws://"))
            .await
            .expect("rebind");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while ws.next().await.is_some() {}
        });

        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Connected).await;
        assert_eq!(manager.last_error(), None);
    }

    #[tokio::test]
    async fn test_status_transitions_published_to_bus() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while ws.next().await.is_some() {}
        });

        let bus = Arc::new(EventBus::new());
        let transitions = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&transitions);
        bus.subscribe(STATUS_TOPIC, move |payload| {
            let status = payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            log.lock().push(status);
        });

        let manager = ConnectionManager::builder()
            .address(url)
            .event_bus(Arc::clone(&bus))
            .build();

        manager.connect();
        wait_for_status(&manager, ConnectionStatus::Connected).await;
        manager.disconnect();

        assert_eq!(
            *transitions.lock(),
            vec!["connecting", "connected", "disconnected"]
        );
    }
}
