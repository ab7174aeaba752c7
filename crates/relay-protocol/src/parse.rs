//! Validating parser for inbound frames.
//!
//! Peers send either JSON text frames ([`ClientMessage`]) or compact binary
//! frames that carry a chunk without base64 overhead:
//!
//! ```text
//! +---------+----------------------+------------------------+
//! | key_len | streamKey (key_len)  | chunk (rest of frame)  |
//! |  1 byte |  UTF-8, 1..=255      |  opaque, non-empty     |
//! +---------+----------------------+------------------------+
//! ```
//!
//! Both paths produce an [`InboundMessage`] whose session identifier is
//! guaranteed non-empty and whose chunk (if any) is non-empty.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use relay_core::{DomainError, SessionId};
use thiserror::Error;

use crate::message::ClientMessage;

/// Largest stream key that fits the one-byte length prefix.
pub const MAX_BINARY_KEY_LEN: usize = u8::MAX as usize;

/// A validated message from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Chunk { session_id: SessionId, chunk: Bytes },
    Stop { session_id: SessionId },
    ViewerJoin { session_id: SessionId },
    ViewerLeave { session_id: SessionId },
}

impl InboundMessage {
    /// Session this message is about.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Chunk { session_id, .. }
            | Self::Stop { session_id }
            | Self::ViewerJoin { session_id }
            | Self::ViewerLeave { session_id } => session_id,
        }
    }
}

/// Reasons an inbound frame is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid JSON frame: {0}")]
    InvalidJson(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("chunk is not valid base64: {0}")]
    InvalidChunkEncoding(String),

    #[error("binary frame truncated: {0}")]
    Truncated(&'static str),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Parses and validates a JSON text frame.
pub fn parse_text_frame(text: &str) -> Result<InboundMessage, ParseError> {
    let msg: ClientMessage =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    match msg {
        ClientMessage::BinaryStream { stream_key, chunk } => {
            let session_id = require_session_id(stream_key)?;
            let encoded = chunk
                .filter(|c| !c.is_empty())
                .ok_or(ParseError::MissingField("chunk"))?;
            let decoded = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| ParseError::InvalidChunkEncoding(e.to_string()))?;
            if decoded.is_empty() {
                return Err(ParseError::MissingField("chunk"));
            }
            Ok(InboundMessage::Chunk {
                session_id,
                chunk: Bytes::from(decoded),
            })
        }
        ClientMessage::StopStream { stream_key } => Ok(InboundMessage::Stop {
            session_id: require_session_id(stream_key)?,
        }),
        ClientMessage::ViewerJoined { stream_key } => Ok(InboundMessage::ViewerJoin {
            session_id: require_session_id(stream_key)?,
        }),
        ClientMessage::ViewerLeft { stream_key } => Ok(InboundMessage::ViewerLeave {
            session_id: require_session_id(stream_key)?,
        }),
    }
}

/// Parses and validates a binary chunk frame.
pub fn parse_binary_frame(frame: Bytes) -> Result<InboundMessage, ParseError> {
    let key_len = match frame.first() {
        Some(&len) => usize::from(len),
        None => return Err(ParseError::Truncated("empty frame")),
    };
    if key_len == 0 {
        return Err(ParseError::MissingField("streamKey"));
    }

    let key_end = 1 + key_len;
    let key_bytes = frame
        .get(1..key_end)
        .ok_or(ParseError::Truncated("stream key shorter than its length prefix"))?;
    let key = std::str::from_utf8(key_bytes).map_err(|_| DomainError::InvalidFieldValue {
        field: "streamKey".to_string(),
        value: format!("{key_len} non-UTF-8 bytes"),
        expected: "UTF-8 text".to_string(),
    })?;
    let session_id = SessionId::parse(key)?;

    let chunk = frame.slice(key_end..);
    if chunk.is_empty() {
        return Err(ParseError::MissingField("chunk"));
    }

    Ok(InboundMessage::Chunk { session_id, chunk })
}

/// Builds a binary chunk frame. Used by clients and tests.
pub fn encode_binary_chunk(session_id: &SessionId, chunk: &[u8]) -> Result<Bytes, ParseError> {
    let key = session_id.as_str().as_bytes();
    let key_len = u8::try_from(key.len()).map_err(|_| DomainError::InvalidFieldValue {
        field: "streamKey".to_string(),
        value: format!("{} bytes", key.len()),
        expected: format!("at most {MAX_BINARY_KEY_LEN} bytes"),
    })?;
    if key_len == 0 {
        return Err(ParseError::MissingField("streamKey"));
    }

    let mut buf = BytesMut::with_capacity(1 + key.len() + chunk.len());
    buf.put_u8(key_len);
    buf.put_slice(key);
    buf.put_slice(chunk);
    Ok(buf.freeze())
}

fn require_session_id(stream_key: Option<String>) -> Result<SessionId, ParseError> {
    let key = stream_key.ok_or(ParseError::MissingField("streamKey"))?;
    Ok(SessionId::parse(key)?)
}
