//! Relay Protocol - Wire protocol for WebSocket peers
//!
//! This crate provides the message types exchanged with browsers
//! (broadcasters and viewers) and the validating parser that turns
//! raw frames into typed inbound messages.

pub mod message;
pub mod parse;

pub use message::{ClientMessage, ServerMessage};
pub use parse::{encode_binary_chunk, parse_binary_frame, parse_text_frame, InboundMessage, ParseError};
