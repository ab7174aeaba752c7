//! Session manager using Actor pattern.
//!
//! The manager is the central state owner for all live transcoders and
//! viewer sets. It receives commands via a tokio mpsc channel, exit
//! notices via a second channel, and publishes viewer counts on a
//! broadcast bus.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ConnectionHandler │────▶│ SessionManager  │────▶│ Broadcast Channel│
//! └──────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                   │           ▲                │
//!         │  ManagerCommand   │           │ ExitNotice     │ RelayEvent
//!         │  (mpsc channel)   ▼           │                ▼
//!    chunk / stop /     SessionRegistry ──┘          Every connection
//!    viewer presence    ViewerRegistry               forwards counts
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

use crate::transcoder::TranscoderConfig;

mod actor;
mod commands;
mod handle;
mod sessions;
mod viewers;

pub use actor::SessionManager;
pub use commands::{
    EndReason, ManagerCommand, ManagerError, RegistryError, RelayEvent, SessionView,
};
pub use handle::ManagerHandle;
pub use sessions::{SessionRegistry, MAX_SESSIONS};
pub use viewers::ViewerRegistry;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 1024;
const EVENT_BUFFER: usize = 256;

/// Spawn the session manager and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the SessionManager on a tokio task
/// 3. Returns a ManagerHandle for client use
///
/// Must be called from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use relayd::registry::spawn_manager;
/// use relayd::transcoder::TranscoderConfig;
///
/// #[tokio::main]
/// async fn main() {
///     let config = TranscoderConfig::ffmpeg("ffmpeg", "rtmp://localhost/live");
///     let handle = spawn_manager(config);
///
///     let sessions = handle.list_sessions().await;
/// }
/// ```
pub fn spawn_manager(config: TranscoderConfig) -> ManagerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let manager = SessionManager::new(cmd_rx, event_tx.clone(), config);
    tokio::spawn(manager.run());

    ManagerHandle::new(cmd_tx, event_tx)
}
