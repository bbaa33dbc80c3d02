//! Transport trait abstraction.
//!
//! A peer transport is a reliable, ordered, message-oriented channel to one
//! remote peer. Setting one up requires exchanging opaque negotiation
//! payloads out of band: the transport emits them as
//! [`TransportEventKind::LocalSignal`] and accepts the remote side's payloads
//! through [`PeerTransport::signal`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Distinguishes successive transports created for the same peer id
pub type ConnectionId = u64;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Negotiation payload not understood
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Frame exceeds the transport limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Frame size
        size: usize,
        /// Maximum accepted
        max: usize,
    },
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// What happened on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// The channel is open for data
    Connected,
    /// The remote side closed the channel
    Closed,
    /// The transport failed
    Error(String),
    /// A message arrived
    Data(Vec<u8>),
    /// A negotiation payload to relay to the remote peer
    LocalSignal(Value),
}

/// Transport event tagged with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Remote peer the transport belongs to
    pub peer_id: String,
    /// Transport instance that produced the event
    pub connection_id: ConnectionId,
    /// Event payload
    pub kind: TransportEventKind,
}

/// Sends events for one transport instance into the owner's queue
#[derive(Debug, Clone)]
pub struct EventEmitter {
    peer_id: String,
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventEmitter {
    /// Create an emitter for a transport
    #[must_use]
    pub fn new(
        peer_id: impl Into<String>,
        connection_id: ConnectionId,
        tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            connection_id,
            tx,
        }
    }

    /// Remote peer id
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Connection id
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event. Returns `false` if the owner is gone.
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(TransportEvent {
                peer_id: self.peer_id.clone(),
                connection_id: self.connection_id,
                kind,
            })
            .is_ok()
    }
}

/// A point-to-point transport to one remote peer.
///
/// Methods never block. Anything asynchronous is reported later through the
/// transport's [`EventEmitter`].
pub trait PeerTransport: Send + Sync {
    /// Feed a negotiation payload received from the remote peer.
    ///
    /// # Errors
    /// Returns `TransportError` if the payload is not understood or the
    /// transport is already closed
    fn signal(&self, payload: Value) -> TransportResult<()>;

    /// Queue a message. Returns `false` if the channel is not open.
    fn send(&self, data: Vec<u8>) -> bool;

    /// Tear the transport down. No further events are emitted.
    fn close(&self);

    /// Whether the channel is open for data
    fn is_open(&self) -> bool;
}

/// Creates transports for the swarm.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport to `peer_id`.
    ///
    /// The initiator starts negotiation by emitting a local signal; the
    /// responder waits for the initiator's payload.
    ///
    /// # Errors
    /// Returns `TransportError` if local resources cannot be set up
    async fn create(
        &self,
        peer_id: &str,
        connection_id: ConnectionId,
        initiator: bool,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<Box<dyn PeerTransport>>;
}
