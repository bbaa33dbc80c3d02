//! Signaling protocol message definitions.
//!
//! Messages travel as JSON text frames, one message per frame, tagged by a
//! kebab-case `type` field with camelCase fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Members already present when a peer joined
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Peer ids, in join order
    pub peers: Vec<String>,
}

/// Signaling messages
///
/// Missing `roomCode`/`peerId` fields decode as empty strings so the server
/// can reject them explicitly instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// Client asks to join (or create) a room
    JoinRoom {
        /// Room code
        #[serde(default)]
        room_code: String,
        /// Joining peer
        #[serde(default)]
        peer_id: String,
    },

    /// Join accepted; lists members present before the joiner
    RoomJoined {
        /// Room code
        room_code: String,
        /// The joiner
        peer_id: String,
        /// Pre-existing members
        data: RoomSnapshot,
    },

    /// Another peer joined the room
    PeerJoined {
        /// Room code
        room_code: String,
        /// The new member
        peer_id: String,
    },

    /// A member left the room
    PeerLeft {
        /// Room code
        room_code: String,
        /// The departed member
        peer_id: String,
    },

    /// Join rejected, room at capacity
    RoomFull {
        /// Room code
        room_code: String,
        /// The rejected peer
        peer_id: String,
    },

    /// Opaque negotiation payload for one member
    Signal {
        /// Room code
        #[serde(default)]
        room_code: String,
        /// Sender
        #[serde(default)]
        peer_id: String,
        /// Recipient
        #[serde(default)]
        target_peer_id: String,
        /// Payload, relayed verbatim
        #[serde(default)]
        data: Value,
    },
}

impl SignalMessage {
    /// Serialize to a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, RendezvousError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Serialization`] on malformed JSON or an
    /// unknown `type` tag.
    pub fn from_json(text: &str) -> Result<Self, RendezvousError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire tag of the message
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::RoomJoined { .. } => "room-joined",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::RoomFull { .. } => "room-full",
            Self::Signal { .. } => "signal",
        }
    }

    /// Room code carried by the message
    #[must_use]
    pub fn room_code(&self) -> &str {
        match self {
            Self::JoinRoom { room_code, .. }
            | Self::RoomJoined { room_code, .. }
            | Self::PeerJoined { room_code, .. }
            | Self::PeerLeft { room_code, .. }
            | Self::RoomFull { room_code, .. }
            | Self::Signal { room_code, .. } => room_code,
        }
    }

    /// Peer id carried by the message (the sender for `signal`)
    #[must_use]
    pub fn peer_id(&self) -> &str {
        match self {
            Self::JoinRoom { peer_id, .. }
            | Self::RoomJoined { peer_id, .. }
            | Self::PeerJoined { peer_id, .. }
            | Self::PeerLeft { peer_id, .. }
            | Self::RoomFull { peer_id, .. }
            | Self::Signal { peer_id, .. } => peer_id,
        }
    }
}

/// Rendezvous errors
#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Room at capacity
    #[error("Room {0} is full")]
    RoomFull(String),

    /// Connection to the server is gone
    #[error("Disconnected from rendezvous server")]
    Disconnected,
}
