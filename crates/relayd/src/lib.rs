//! Relay Daemon - per-session transcoder lifecycle and viewer presence
//!
//! This crate provides the core infrastructure for the relay daemon:
//! - `registry` - Session manager actor owning transcoders and viewer sets
//! - `transcoder` - Wrapper around one external ffmpeg process
//! - `server` - WebSocket server for browser connections
//! - `config` - Environment-driven configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       relayd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │────▶│      SessionManager         │   │
//! │  │  (WebSocket)    │     │ (sessions + viewers owner)  │   │
//! │  └────────┬────────┘     └───────┬──────────────▲──────┘   │
//! │           │                      │              │          │
//! │           │ connections          │ events       │ exits    │
//! │           ▼                      ▼              │          │
//! │  ┌─────────────────┐     ┌───────────────┐ ┌────┴──────┐   │
//! │  │ConnectionHandler│◀────│ broadcast bus │ │  ffmpeg   │   │
//! │  │   (per peer)    │     └───────────────┘ │ (per key) │   │
//! │  └─────────────────┘                       └───────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod registry;
pub mod server;
pub mod transcoder;
