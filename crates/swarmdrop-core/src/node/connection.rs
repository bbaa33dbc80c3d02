//! Peer connection manager.
//!
//! Keeps at most one live transport per peer id and turns raw transport
//! events into [`ConnectionEvent`]s. Every transport gets a fresh
//! [`ConnectionId`]; events carrying a superseded id are dropped, so a
//! replaced transport can never disturb its successor.
//!
//! The manager is shared between the swarm event loop and send tasks
//! through an `Arc`. Links live in a `DashMap` so sends from several tasks
//! never contend on a single lock.
//!
//! No retries happen here; the swarm applies its retry policy to
//! [`ConnectionEvent::Error`].

use crate::frame::{self, Frame};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use swarmdrop_transport::{
    ConnectionId, PeerTransport, TransportError, TransportEvent, TransportEventKind,
    TransportFactory, TransportResult,
};
use tokio::sync::mpsc;

/// Translated transport event
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Transport open for data
    Connected {
        /// Remote peer
        peer_id: String,
    },
    /// Transport closed by the remote side
    Closed {
        /// Remote peer
        peer_id: String,
    },
    /// Transport failed
    Error {
        /// Remote peer
        peer_id: String,
        /// Failure description
        cause: String,
    },
    /// A well-formed frame arrived
    Frame {
        /// Remote peer
        peer_id: String,
        /// Decoded frame
        frame: Frame,
    },
    /// Negotiation payload to relay through the rendezvous service
    LocalSignal {
        /// Remote peer
        peer_id: String,
        /// Opaque payload
        payload: Value,
    },
}

struct PeerLink {
    connection_id: ConnectionId,
    transport: Arc<dyn PeerTransport>,
    connected: bool,
}

impl PeerLink {
    fn is_connected(&self) -> bool {
        self.connected && self.transport.is_open()
    }
}

/// Owns the transports to every peer
pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    links: DashMap<String, PeerLink>,
    next_connection_id: AtomicU64,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("links", &self.links.len())
            .field("connected", &self.connected_count())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager. Raw transport events arrive on the returned
    /// receiver and must be fed back through [`handle_event`](Self::handle_event).
    #[must_use]
    pub fn new(factory: Arc<dyn TransportFactory>) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            factory,
            links: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            events,
        };
        (manager, rx)
    }

    /// Create a transport to `peer_id`, destroying any existing one first.
    ///
    /// # Errors
    ///
    /// Returns the factory's [`TransportError`] if the transport cannot be
    /// created.
    pub async fn create_connection(&self, peer_id: &str, initiator: bool) -> TransportResult<ConnectionId> {
        self.disconnect(peer_id);

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let transport = self
            .factory
            .create(peer_id, connection_id, initiator, self.events.clone())
            .await?;

        tracing::debug!(peer = %peer_id, connection_id, initiator, "transport created");

        if let Some(old) = self.links.insert(
            peer_id.to_string(),
            PeerLink {
                connection_id,
                transport: Arc::from(transport),
                connected: false,
            },
        ) {
            old.transport.close();
        }

        Ok(connection_id)
    }

    /// Feed a remote negotiation payload to the peer's transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if there is no transport for the
    /// peer, or the transport's own error if it rejects the payload.
    pub fn signal(&self, peer_id: &str, payload: Value) -> TransportResult<()> {
        let transport = self.transport(peer_id).ok_or(TransportError::Closed)?;
        transport.signal(payload)
    }

    /// Send bytes to one peer. Returns `false` unless the transport is connected.
    pub fn send(&self, peer_id: &str, data: Vec<u8>) -> bool {
        let transport = match self.links.get(peer_id) {
            Some(link) if link.is_connected() => Arc::clone(&link.transport),
            _ => return false,
        };
        transport.send(data)
    }

    /// Send bytes to every connected peer. Returns how many accepted them.
    pub fn broadcast(&self, data: &[u8]) -> usize {
        self.connected_peer_ids()
            .iter()
            .filter(|peer_id| self.send(peer_id, data.to_vec()))
            .count()
    }

    /// Close and forget the peer's transport
    pub fn disconnect(&self, peer_id: &str) {
        if let Some((_, link)) = self.links.remove(peer_id) {
            tracing::debug!(peer = %peer_id, connection_id = link.connection_id, "transport closed");
            link.transport.close();
        }
    }

    /// Close every transport
    pub fn disconnect_all(&self) {
        let peers: Vec<String> = self.links.iter().map(|l| l.key().clone()).collect();
        for peer_id in peers {
            self.disconnect(&peer_id);
        }
    }

    /// Whether a transport exists for the peer (connected or not)
    #[must_use]
    pub fn has_connection(&self, peer_id: &str) -> bool {
        self.links.contains_key(peer_id)
    }

    /// Whether the peer's transport is open
    #[must_use]
    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.links.get(peer_id).is_some_and(|l| l.is_connected())
    }

    /// Ids of connected peers, sorted
    #[must_use]
    pub fn connected_peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .links
            .iter()
            .filter(|l| l.is_connected())
            .map(|l| l.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of connected peers
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.links.iter().filter(|l| l.is_connected()).count()
    }

    /// Translate a raw transport event.
    ///
    /// Returns `None` for events from superseded transports and for
    /// malformed frames.
    pub fn handle_event(&self, event: TransportEvent) -> Option<ConnectionEvent> {
        let TransportEvent {
            peer_id,
            connection_id,
            kind,
        } = event;

        let current = self.links.get(&peer_id).map(|l| l.connection_id);
        if current != Some(connection_id) {
            tracing::trace!(peer = %peer_id, connection_id, "dropping event from stale transport");
            return None;
        }

        match kind {
            TransportEventKind::Connected => {
                if let Some(mut link) = self.links.get_mut(&peer_id) {
                    link.connected = true;
                }
                Some(ConnectionEvent::Connected { peer_id })
            }
            TransportEventKind::Closed => {
                self.disconnect(&peer_id);
                Some(ConnectionEvent::Closed { peer_id })
            }
            TransportEventKind::Error(cause) => {
                self.disconnect(&peer_id);
                Some(ConnectionEvent::Error { peer_id, cause })
            }
            TransportEventKind::Data(bytes) => match frame::decode(&bytes) {
                Ok(frame) => Some(ConnectionEvent::Frame { peer_id, frame }),
                Err(e) => {
                    tracing::debug!(peer = %peer_id, error = %e, "dropping malformed frame");
                    None
                }
            },
            TransportEventKind::LocalSignal(payload) => Some(ConnectionEvent::LocalSignal { peer_id, payload }),
        }
    }

    fn transport(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>> {
        self.links.get(peer_id).map(|l| Arc::clone(&l.transport))
    }
}
