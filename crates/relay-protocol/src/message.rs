//! Protocol message types for relay peers.
//!
//! Every JSON frame carries an `event` tag. Field names (`streamKey`,
//! `chunk`, `count`) match what existing browser clients already send.

use relay_core::SessionId;
use serde::{Deserialize, Serialize};

/// Messages sent by peers to the relay.
///
/// Fields are optional at this layer so that a frame with a missing
/// `streamKey` still deserializes and can be rejected with a precise
/// reason by [`crate::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// A media chunk for a broadcast (base64 encoded in JSON frames)
    #[serde(rename = "binarystream")]
    BinaryStream {
        #[serde(rename = "streamKey", default, skip_serializing_if = "Option::is_none")]
        stream_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk: Option<String>,
    },

    /// Broadcaster asks the relay to stop publishing a stream
    StopStream {
        #[serde(rename = "streamKey", default, skip_serializing_if = "Option::is_none")]
        stream_key: Option<String>,
    },

    /// Peer started watching a stream
    ViewerJoined {
        #[serde(rename = "streamKey", default, skip_serializing_if = "Option::is_none")]
        stream_key: Option<String>,
    },

    /// Peer stopped watching a stream
    ViewerLeft {
        #[serde(rename = "streamKey", default, skip_serializing_if = "Option::is_none")]
        stream_key: Option<String>,
    },
}

impl ClientMessage {
    /// Creates a chunk message with an already base64-encoded payload.
    pub fn binary_stream(stream_key: &str, chunk_base64: &str) -> Self {
        Self::BinaryStream {
            stream_key: Some(stream_key.to_string()),
            chunk: Some(chunk_base64.to_string()),
        }
    }

    /// Creates a stop request.
    pub fn stop_stream(stream_key: &str) -> Self {
        Self::StopStream {
            stream_key: Some(stream_key.to_string()),
        }
    }

    /// Creates a viewer join notification.
    pub fn viewer_joined(stream_key: &str) -> Self {
        Self::ViewerJoined {
            stream_key: Some(stream_key.to_string()),
        }
    }

    /// Creates a viewer leave notification.
    pub fn viewer_left(stream_key: &str) -> Self {
        Self::ViewerLeft {
            stream_key: Some(stream_key.to_string()),
        }
    }
}

/// Messages sent from the relay to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Acknowledges a stop request (sent to the requester only)
    StreamStopped {
        #[serde(rename = "streamKey")]
        stream_key: SessionId,
    },

    /// Current number of viewers of a stream (sent to every peer)
    ViewerCount {
        #[serde(rename = "streamKey")]
        stream_key: SessionId,
        count: usize,
    },
}

impl ServerMessage {
    /// Creates a stop acknowledgement.
    pub fn stream_stopped(stream_key: SessionId) -> Self {
        Self::StreamStopped { stream_key }
    }

    /// Creates a viewer count notification.
    pub fn viewer_count(stream_key: SessionId, count: usize) -> Self {
        Self::ViewerCount { stream_key, count }
    }
}
