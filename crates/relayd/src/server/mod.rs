//! WebSocket server for the relay daemon.
//!
//! The server:
//! - Listens on TCP for browser connections
//! - Spawns a ConnectionHandler for each peer
//! - Assigns each peer a connection identifier (`conn-<n>`)
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  ManagerHandle  │
//! │   (per peer)    │◀────│  (event bus)    │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, PING_INTERVAL};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_core::ConnectionId;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::ManagerHandle;

/// WebSocket server for the relay daemon.
pub struct RelayServer {
    listener: TcpListener,

    /// Handle to the session manager
    manager: ManagerHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection IDs
    connection_counter: AtomicU64,
}

impl RelayServer {
    /// Binds the listener.
    ///
    /// Port 0 picks a free port; see [`RelayServer::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        manager: ManagerHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            manager,
            cancel_token,
            connection_counter: AtomicU64::new(1),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Relay server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let n = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, ConnectionId::from_sequence(n));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Handles a new peer connection by spawning a handler task.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, conn_id: ConnectionId) {
        debug!(conn_id = %conn_id, peer = %peer, "Accepted TCP connection");

        if let Err(e) = stream.set_nodelay(true) {
            debug!(conn_id = %conn_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let handler = ConnectionHandler::new(conn_id, self.manager.clone(), self.cancel_token.clone());
        tokio::spawn(handler.run(stream));
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}
