//! TCP peer transport.
//!
//! Negotiation: the initiator binds an ephemeral listener and emits
//! `{"type":"offer","addr":"ip:port"}`. The responder connects to that
//! address and emits `{"type":"answer"}` once connected. No NAT traversal is
//! attempted; both peers must be directly reachable.
//!
//! Messages are framed with a big-endian `u32` length prefix.

use crate::transport::{
    ConnectionId, EventEmitter, PeerTransport, TransportError, TransportEvent, TransportEventKind,
    TransportFactory, TransportResult,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Default maximum frame size (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address the initiator's listener binds to
    pub bind_ip: IpAddr,
    /// Address advertised in offers (defaults to the bound address)
    pub advertise_ip: Option<IpAddr>,
    /// Largest accepted frame
    pub max_frame_size: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            advertise_ip: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Creates TCP transports
#[derive(Debug, Clone, Default)]
pub struct TcpTransportFactory {
    config: TcpTransportConfig,
}

impl TcpTransportFactory {
    /// Create a factory
    #[must_use]
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for TcpTransportFactory {
    async fn create(
        &self,
        peer_id: &str,
        connection_id: ConnectionId,
        initiator: bool,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<Box<dyn PeerTransport>> {
        let shared = Shared::new(
            EventEmitter::new(peer_id, connection_id, events),
            self.config.max_frame_size,
        );

        if initiator {
            let listener = TcpListener::bind(SocketAddr::new(self.config.bind_ip, 0)).await?;
            let local = listener.local_addr()?;
            let advertised =
                SocketAddr::new(self.config.advertise_ip.unwrap_or(local.ip()), local.port());

            tracing::debug!(peer = %peer_id, addr = %advertised, "tcp transport listening");
            shared.emitter.emit(TransportEventKind::LocalSignal(
                json!({ "type": "offer", "addr": advertised.to_string() }),
            ));

            let task_shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut shutdown = task_shared.shutdown.subscribe();
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            tracing::debug!(addr = %remote, "tcp transport accepted");
                            run(task_shared, stream).await;
                        }
                        Err(e) => task_shared.fail(e.to_string()),
                    },
                    _ = shutdown.changed() => {}
                }
            });
        }

        Ok(Box::new(TcpTransport {
            shared,
            initiator,
            dialing: AtomicBool::new(false),
        }))
    }
}

struct Shared {
    emitter: EventEmitter,
    open: AtomicBool,
    closed: AtomicBool,
    writer: OnceLock<mpsc::UnboundedSender<Vec<u8>>>,
    shutdown: watch::Sender<bool>,
    max_frame_size: usize,
}

impl Shared {
    fn new(emitter: EventEmitter, max_frame_size: usize) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            emitter,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            writer: OnceLock::new(),
            shutdown,
            max_frame_size,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn fail(&self, cause: String) {
        self.open.store(false, Ordering::SeqCst);
        if !self.is_closed() {
            self.emitter.emit(TransportEventKind::Error(cause));
        }
    }
}

/// A TCP connection to one peer
pub struct TcpTransport {
    shared: Arc<Shared>,
    initiator: bool,
    dialing: AtomicBool,
}

impl TcpTransport {
    fn dial(&self, addr: SocketAddr) {
        if self.dialing.swap(true, Ordering::SeqCst) {
            tracing::debug!(peer = %self.shared.emitter.peer_id(), "duplicate offer ignored");
            return;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut shutdown = shared.shutdown.subscribe();
            let stream = tokio::select! {
                connected = TcpStream::connect(addr) => connected,
                _ = shutdown.changed() => return,
            };

            match stream {
                Ok(stream) => {
                    shared
                        .emitter
                        .emit(TransportEventKind::LocalSignal(json!({ "type": "answer" })));
                    run(shared, stream).await;
                }
                Err(e) => shared.fail(format!("connect to {addr} failed: {e}")),
            }
        });
    }
}

impl PeerTransport for TcpTransport {
    fn signal(&self, payload: Value) -> TransportResult<()> {
        if self.shared.is_closed() {
            return Err(TransportError::Closed);
        }

        match payload.get("type").and_then(Value::as_str) {
            Some("offer") if !self.initiator => {
                let addr: SocketAddr = payload
                    .get("addr")
                    .and_then(Value::as_str)
                    .ok_or_else(|| TransportError::InvalidSignal("offer without addr".into()))?
                    .parse()
                    .map_err(|e| TransportError::InvalidSignal(format!("bad offer addr: {e}")))?;
                self.dial(addr);
                Ok(())
            }
            Some("answer") if self.initiator => Ok(()),
            other => Err(TransportError::InvalidSignal(format!("unexpected {other:?}"))),
        }
    }

    fn send(&self, data: Vec<u8>) -> bool {
        if !self.is_open() || data.len() > self.shared.max_frame_size {
            return false;
        }
        self.shared
            .writer
            .get()
            .is_some_and(|writer| writer.send(data).is_ok())
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.open.store(false, Ordering::SeqCst);
        let _ = self.shared.shutdown.send(true);
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst) && !self.shared.is_closed()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(shared: Arc<Shared>, stream: TcpStream) {
    if shared.is_closed() {
        return;
    }
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = shared.writer.set(tx);

    shared.open.store(true, Ordering::SeqCst);
    shared.emitter.emit(TransportEventKind::Connected);

    tokio::spawn(write_loop(Arc::clone(&shared), writer, rx));

    let mut shutdown = shared.shutdown.subscribe();
    let result = tokio::select! {
        result = read_loop(&shared, reader) => result,
        _ = shutdown.changed() => return,
    };

    shared.open.store(false, Ordering::SeqCst);
    match result {
        Ok(()) => {
            if !shared.is_closed() {
                shared.emitter.emit(TransportEventKind::Closed);
            }
        }
        Err(e) => shared.fail(e.to_string()),
    }
}

async fn read_loop(shared: &Shared, mut reader: OwnedReadHalf) -> TransportResult<()> {
    loop {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if len > shared.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: shared.max_frame_size,
            });
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        shared.emitter.emit(TransportEventKind::Data(frame));
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let frame = tokio::select! {
            frame = rx.recv() => frame,
            _ = shutdown.changed() => None,
        };
        let Some(frame) = frame else { break };

        let written = async {
            writer.write_u32(frame.len() as u32).await?;
            writer.write_all(&frame).await
        }
        .await;

        if let Err(e) = written {
            tracing::debug!(peer = %shared.emitter.peer_id(), error = %e, "tcp write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEventKind {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .kind
    }

    #[tokio::test]
    async fn test_tcp_offer_answer_and_data() {
        let factory = TcpTransportFactory::default();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();

        let a = factory.create("b", 1, true, a_tx).await.unwrap();
        let b = factory.create("a", 1, false, b_tx).await.unwrap();

        let offer = match next(&mut a_rx).await {
            TransportEventKind::LocalSignal(offer) => offer,
            other => panic!("expected offer, got {other:?}"),
        };
        assert_eq!(offer["type"], "offer");
        b.signal(offer).unwrap();

        let mut b_connected = false;
        let mut answer = None;
        while !b_connected || answer.is_none() {
            match next(&mut b_rx).await {
                TransportEventKind::Connected => b_connected = true,
                TransportEventKind::LocalSignal(payload) => answer = Some(payload),
                other => panic!("unexpected {other:?}"),
            }
        }
        a.signal(answer.unwrap()).unwrap();
        assert_eq!(next(&mut a_rx).await, TransportEventKind::Connected);

        assert!(a.send(b"hello".to_vec()));
        assert!(b.send(vec![0u8; 100_000]));
        assert_eq!(next(&mut b_rx).await, TransportEventKind::Data(b"hello".to_vec()));
        match next(&mut a_rx).await {
            TransportEventKind::Data(data) => assert_eq!(data.len(), 100_000),
            other => panic!("unexpected {other:?}"),
        }

        a.close();
        assert_eq!(next(&mut b_rx).await, TransportEventKind::Closed);
    }

    #[tokio::test]
    async fn test_tcp_bad_offer_rejected() {
        let factory = TcpTransportFactory::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let b = factory.create("a", 1, false, tx).await.unwrap();

        assert!(b.signal(json!({ "type": "offer", "addr": "nope" })).is_err());
        assert!(b.signal(json!({ "type": "answer" })).is_err());
        assert!(!b.send(vec![1]));
    }
}
