//! Connection handler for individual WebSocket peers.
//!
//! Each peer connection gets its own `ConnectionHandler` that:
//! - Performs the WebSocket handshake
//! - Parses incoming frames into validated messages
//! - Routes chunks, stop requests and viewer presence to the session manager
//! - Forwards viewer counts from the event bus to the peer
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Malformed frames are logged and skipped; transport errors end the connection

use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use relay_core::ConnectionId;
use relay_protocol::{parse_binary_frame, parse_text_frame, InboundMessage, ServerMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{ManagerError, ManagerHandle, RelayEvent};

/// Interval between server pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single peer.
///
/// Broadcasters and viewers share one handler type: what a peer is depends
/// only on which events it sends.
pub struct ConnectionHandler {
    conn_id: ConnectionId,

    /// Handle to the session manager
    manager: ManagerHandle,

    /// Relay events, subscribed at construction so nothing published after
    /// accept is missed
    events: broadcast::Receiver<RelayEvent>,

    cancel_token: CancellationToken,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `conn_id` - Identifier of this connection in viewer sets
    /// * `manager` - Handle to the session manager
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        conn_id: ConnectionId,
        manager: ManagerHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        let events = manager.subscribe();
        Self {
            conn_id,
            manager,
            events,
            cancel_token,
        }
    }

    pub fn conn_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake then processes frames until the peer goes
    /// away. On exit the connection is removed from every viewer set.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        info!(conn_id = %self.conn_id, "Peer connected");

        if let Err(e) = self.process_messages(ws).await {
            debug!(conn_id = %self.conn_id, error = %e, "Connection closed with error");
        }

        match self.manager.disconnect(self.conn_id.clone()).await {
            Ok(affected) => {
                info!(conn_id = %self.conn_id, affected, "Peer disconnected");
            }
            Err(e) => {
                debug!(conn_id = %self.conn_id, error = %e, "Peer disconnected, manager unavailable");
            }
        }
    }

    /// Main processing loop.
    async fn process_messages<S>(&mut self, ws: WebSocketStream<S>) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();

        let mut ping = interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ping.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(conn_id = %self.conn_id, "Closing connection for shutdown");
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }

                frame = stream.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(ConnectionError::WebSocket(e.to_string())),
                        None => return Ok(()),
                    };

                    let inbound = match message {
                        Message::Text(text) => parse_text_frame(&text),
                        Message::Binary(data) => parse_binary_frame(data.into()),
                        Message::Close(_) => return Ok(()),
                        // Pings are answered by tungstenite
                        _ => continue,
                    };

                    match inbound {
                        Ok(inbound) => {
                            if let Some(reply) = self.dispatch(inbound).await? {
                                send_message(&mut sink, &reply).await?;
                            }
                        }
                        Err(e) => {
                            warn!(conn_id = %self.conn_id, error = %e, "Rejected frame");
                        }
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Ok(RelayEvent::ViewerCount { session_id, count }) => {
                            send_message(&mut sink, &ServerMessage::viewer_count(session_id, count)).await?;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(conn_id = %self.conn_id, skipped, "Peer lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(ConnectionError::Manager(ManagerError::ChannelClosed));
                        }
                    }
                }

                _ = ping.tick() => {
                    send_frame(&mut sink, Message::Ping(Vec::new())).await?;
                }
            }
        }
    }

    /// Routes a validated message to the manager.
    ///
    /// Returns the reply owed to this peer, if any.
    async fn dispatch(
        &self,
        message: InboundMessage,
    ) -> Result<Option<ServerMessage>, ConnectionError> {
        match message {
            InboundMessage::Chunk { session_id, chunk } => {
                self.manager.forward_chunk(session_id, chunk).await?;
                Ok(None)
            }
            InboundMessage::Stop { session_id } => {
                let was_running = self.manager.stop(session_id.clone()).await?;
                info!(
                    conn_id = %self.conn_id,
                    session_id = %session_id,
                    was_running,
                    "Stream stop requested"
                );
                Ok(Some(ServerMessage::stream_stopped(session_id)))
            }
            InboundMessage::ViewerJoin { session_id } => {
                self.manager
                    .join_viewer(session_id, self.conn_id.clone())
                    .await?;
                Ok(None)
            }
            InboundMessage::ViewerLeave { session_id } => {
                self.manager
                    .leave_viewer(session_id, self.conn_id.clone())
                    .await?;
                Ok(None)
            }
        }
    }
}

/// Serializes and sends a message to a peer.
async fn send_message<W>(sink: &mut W, message: &ServerMessage) -> Result<(), ConnectionError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json =
        serde_json::to_string(message).map_err(|e| ConnectionError::Serialize(e.to_string()))?;
    send_frame(sink, Message::Text(json)).await
}

async fn send_frame<W>(sink: &mut W, frame: Message) -> Result<(), ConnectionError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match timeout(WRITE_TIMEOUT, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::WebSocket(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Failed to serialize message: {0}")]
    Serialize(String),

    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),
}
