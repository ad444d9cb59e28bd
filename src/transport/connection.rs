//! Live transport handle and its event loop.
//!
//! A [`Connection`] owns one established WebSocket stream. It spawns a
//! tokio task that handles:
//!
//! - Incoming frames from the server (dispatched to message handlers)
//! - Outgoing frames queued by `send()`
//! - Close and error events, reported back to the manager state machine
//!
//! The handle is owned exclusively by the manager; callers never receive
//! raw access to the stream.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::ABNORMAL_CLOSURE_CODE;

use super::manager::Shared;

// ============================================================================
// Types
// ============================================================================

/// Established client-side WebSocket stream type.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Transmit a serialized outbound frame.
    Send(String),
    /// Close the stream and terminate the event loop.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// The live transport handle.
///
/// Created when an establishment attempt opens; destroyed on
/// `disconnect()`, on fatal error, or before establishing a replacement.
/// At most one instance is open at a time.
pub(crate) struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
        }
    }
}

impl Connection {
    /// Creates a connection from an established stream and spawns its
    /// event loop task.
    ///
    /// Events carry `generation` so that a delayed event from a superseded
    /// connection is ignored by the manager.
    pub(crate) fn spawn(ws_stream: WsStream, shared: Arc<Shared>, generation: u64) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run_event_loop(
            ws_stream, command_rx, shared, generation,
        ));

        Self { command_tx }
    }

    /// Queues a serialized frame for transmission.
    pub(crate) fn send_text(&self, text: String) {
        if self.command_tx.send(ConnectionCommand::Send(text)).is_err() {
            warn!("outbound frame dropped: event loop already terminated");
        }
    }

    /// Closes the stream and terminates the event loop.
    pub(crate) fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        shared: Arc<Shared>,
        generation: u64,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from the server
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            shared.dispatch_inbound(generation, text.as_str());
                        }

                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map_or(ABNORMAL_CLOSURE_CODE, |f| f.code.into());
                            debug!(code, "close frame received");
                            shared.handle_close(generation, code);
                            break;
                        }

                        Some(Err(e)) => {
                            shared.handle_transport_error(generation, e);
                            break;
                        }

                        None => {
                            // stream ended without a closing handshake
                            debug!("websocket stream ended");
                            shared.handle_close(generation, ABNORMAL_CLOSURE_CODE);
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Outgoing frames and shutdown
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(text)) => {
                            trace!(len = text.len(), "transmitting frame");
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                shared.handle_transport_error(generation, e);
                                break;
                            }
                        }

                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!("shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!(generation, "connection event loop terminated");
    }
}
