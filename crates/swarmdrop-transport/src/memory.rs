//! In-process memory transport.
//!
//! All nodes sharing one [`MemoryNetwork`] can reach each other. Negotiation
//! mirrors a real offer/answer exchange: the initiator parks an endpoint in
//! the network and emits `{"type":"offer","token":N}`; the responder claims
//! that endpoint when the offer is signalled to it, links both ends, and
//! answers with `{"type":"answer"}`. Payloads still travel through the
//! rendezvous service, so signaling paths are exercised end to end.
//!
//! Failure injection: peers marked unreachable fail every transport created
//! towards them with [`TransportEventKind::Error`]. A single responder-side
//! failure can be queued with [`MemoryNetwork::fail_next_accept`].

use crate::transport::{
    ConnectionId, EventEmitter, PeerTransport, TransportError, TransportEvent, TransportEventKind,
    TransportFactory, TransportResult,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::mpsc;

struct Endpoint {
    emitter: EventEmitter,
    remote: OnceLock<Weak<Endpoint>>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl Endpoint {
    fn new(emitter: EventEmitter) -> Arc<Self> {
        Arc::new(Self {
            emitter,
            remote: OnceLock::new(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn remote(&self) -> Option<Arc<Endpoint>> {
        self.remote.get().and_then(Weak::upgrade)
    }
}

#[derive(Default)]
struct NetworkInner {
    next_token: AtomicU64,
    pending: DashMap<u64, Arc<Endpoint>>,
    unreachable: DashSet<String>,
    failing_accepts: DashSet<String>,
    dial_attempts: DashMap<String, usize>,
}

/// Shared in-process network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for the node identified by `local_peer_id`
    #[must_use]
    pub fn factory(&self, local_peer_id: impl Into<String>) -> MemoryTransportFactory {
        MemoryTransportFactory {
            network: self.clone(),
            local_peer_id: local_peer_id.into(),
        }
    }

    /// Make every transport to or from `peer_id` fail
    pub fn set_unreachable(&self, peer_id: impl Into<String>) {
        self.inner.unreachable.insert(peer_id.into());
    }

    /// Undo [`set_unreachable`](Self::set_unreachable)
    pub fn set_reachable(&self, peer_id: &str) {
        self.inner.unreachable.remove(peer_id);
    }

    /// Fail the next responder transport created by `peer_id`
    pub fn fail_next_accept(&self, peer_id: impl Into<String>) {
        self.inner.failing_accepts.insert(peer_id.into());
    }

    /// Number of initiator transports created towards `peer_id`
    #[must_use]
    pub fn dial_attempts(&self, peer_id: &str) -> usize {
        self.inner.dial_attempts.get(peer_id).map_or(0, |n| *n)
    }

    fn is_unreachable(&self, peer_id: &str) -> bool {
        self.inner.unreachable.contains(peer_id)
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("pending", &self.inner.pending.len())
            .field("unreachable", &self.inner.unreachable.len())
            .finish()
    }
}

/// Creates memory transports for one node
#[derive(Debug, Clone)]
pub struct MemoryTransportFactory {
    network: MemoryNetwork,
    local_peer_id: String,
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn create(
        &self,
        peer_id: &str,
        connection_id: ConnectionId,
        initiator: bool,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<Box<dyn PeerTransport>> {
        let emitter = EventEmitter::new(peer_id, connection_id, events);
        let endpoint = Endpoint::new(emitter.clone());
        let inner = Arc::clone(&self.network.inner);

        if initiator {
            *inner.dial_attempts.entry(peer_id.to_string()).or_insert(0) += 1;
        }

        let transport = MemoryTransport {
            network: self.network.clone(),
            endpoint,
            initiator,
            token: OnceLock::new(),
        };

        let failed_accept = !initiator && inner.failing_accepts.remove(&self.local_peer_id).is_some();
        if failed_accept
            || self.network.is_unreachable(peer_id)
            || self.network.is_unreachable(&self.local_peer_id)
        {
            tracing::debug!(local = %self.local_peer_id, peer = %peer_id, "memory peer unreachable");
            transport.endpoint.closed.store(true, Ordering::SeqCst);
            emitter.emit(TransportEventKind::Error("peer unreachable".to_string()));
            return Ok(Box::new(transport));
        }

        if initiator {
            let token = inner.next_token.fetch_add(1, Ordering::Relaxed);
            inner.pending.insert(token, Arc::clone(&transport.endpoint));
            let _ = transport.token.set(token);
            emitter.emit(TransportEventKind::LocalSignal(
                json!({ "type": "offer", "token": token }),
            ));
        }

        Ok(Box::new(transport))
    }
}

/// One end of an in-process channel
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: Arc<Endpoint>,
    initiator: bool,
    token: OnceLock<u64>,
}

impl MemoryTransport {
    fn accept_offer(&self, token: u64) -> TransportResult<()> {
        let (_, remote) = self
            .network
            .inner
            .pending
            .remove(&token)
            .ok_or_else(|| TransportError::InvalidSignal(format!("unknown offer token {token}")))?;

        if remote.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("initiator closed".to_string()));
        }

        let _ = self.endpoint.remote.set(Arc::downgrade(&remote));
        let _ = remote.remote.set(Arc::downgrade(&self.endpoint));
        remote.open.store(true, Ordering::SeqCst);
        self.endpoint.open.store(true, Ordering::SeqCst);

        // Both sides learn about the link before either can send data
        remote.emitter.emit(TransportEventKind::Connected);
        self.endpoint.emitter.emit(TransportEventKind::Connected);
        self.endpoint
            .emitter
            .emit(TransportEventKind::LocalSignal(json!({ "type": "answer" })));

        Ok(())
    }
}

impl PeerTransport for MemoryTransport {
    fn signal(&self, payload: Value) -> TransportResult<()> {
        if self.endpoint.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        match payload.get("type").and_then(Value::as_str) {
            Some("offer") if !self.initiator => {
                let token = payload
                    .get("token")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| TransportError::InvalidSignal("offer without token".into()))?;
                self.accept_offer(token)
            }
            Some("answer") if self.initiator => Ok(()),
            other => Err(TransportError::InvalidSignal(format!(
                "unexpected {:?} for {}",
                other,
                if self.initiator { "initiator" } else { "responder" }
            ))),
        }
    }

    fn send(&self, data: Vec<u8>) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.endpoint.remote() {
            Some(remote) if remote.open.load(Ordering::SeqCst) => {
                remote.emitter.emit(TransportEventKind::Data(data))
            }
            _ => false,
        }
    }

    fn close(&self) {
        if self.endpoint.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.endpoint.open.store(false, Ordering::SeqCst);

        if let Some(token) = self.token.get() {
            self.network.inner.pending.remove(token);
        }

        if let Some(remote) = self.endpoint.remote() {
            if !remote.closed.load(Ordering::SeqCst) && remote.open.swap(false, Ordering::SeqCst) {
                remote.emitter.emit(TransportEventKind::Closed);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.endpoint.open.load(Ordering::SeqCst) && !self.endpoint.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
