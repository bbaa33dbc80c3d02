//! Rendezvous server.
//!
//! One hub task owns the [`RoomDirectory`]; each accepted socket gets its own
//! task that forwards parsed messages to the hub over a channel, so joins,
//! relays and disconnects are applied in a single total order.
//!
//! The same port answers plain HTTP: `GET /health` returns
//! `{"status":"ok","rooms":N,"uptime":secs}`, anything else is a 404.
//! Requests carrying `Upgrade: websocket` become signaling connections.

use crate::directory::{ConnId, JoinOutcome, LeaveOutcome, RoomDirectory};
use crate::protocol::{RendezvousError, RoomSnapshot, SignalMessage};
use crate::{DEFAULT_MAX_ROOM_SIZE, DEFAULT_PORT};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

/// Upper bound on peeked request head
const MAX_REQUEST_HEAD: usize = 4096;

/// Rendezvous server configuration
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Listening address
    pub bind_addr: SocketAddr,
    /// Maximum members per room
    pub max_room_size: usize,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_room_size: DEFAULT_MAX_ROOM_SIZE,
        }
    }
}

impl RendezvousConfig {
    /// Default configuration with the port taken from `PORT` when set
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.bind_addr.set_port(port);
        }
        config
    }
}

/// Liveness probe body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    /// Always `"ok"`
    pub status: &'static str,
    /// Live rooms
    pub rooms: usize,
    /// Seconds since start
    pub uptime: f64,
}

enum HubEvent {
    Connected {
        conn: ConnId,
        outbound: mpsc::UnboundedSender<SignalMessage>,
    },
    Message {
        conn: ConnId,
        msg: SignalMessage,
    },
    Disconnected {
        conn: ConnId,
    },
    Health {
        reply: oneshot::Sender<HealthStatus>,
    },
}

struct Hub {
    directory: RoomDirectory,
    outbound: HashMap<ConnId, mpsc::UnboundedSender<SignalMessage>>,
    started: Instant,
}

impl Hub {
    fn send(&self, conn: ConnId, msg: SignalMessage) {
        if let Some(tx) = self.outbound.get(&conn) {
            let _ = tx.send(msg);
        }
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected { conn, outbound } => {
                tracing::debug!(conn, "signaling connection opened");
                self.outbound.insert(conn, outbound);
            }
            HubEvent::Message { conn, msg } => self.handle_message(conn, msg),
            HubEvent::Disconnected { conn } => {
                self.outbound.remove(&conn);
                if let Some(left) = self.directory.leave(conn) {
                    tracing::info!(peer = %left.peer_id, room = %left.room_code, "disconnect");
                    self.announce_leave(left);
                }
            }
            HubEvent::Health { reply } => {
                let _ = reply.send(HealthStatus {
                    status: "ok",
                    rooms: self.directory.room_count(),
                    uptime: self.started.elapsed().as_secs_f64(),
                });
            }
        }
    }

    fn handle_message(&mut self, conn: ConnId, msg: SignalMessage) {
        match msg {
            SignalMessage::JoinRoom { room_code, peer_id } => {
                if room_code.is_empty() || peer_id.is_empty() {
                    tracing::debug!(conn, "join-room without roomCode or peerId ignored");
                    return;
                }
                self.handle_join(conn, room_code, peer_id);
            }
            SignalMessage::Signal {
                ref room_code,
                ref peer_id,
                ref target_peer_id,
                ref data,
            } => {
                if room_code.is_empty() || target_peer_id.is_empty() {
                    tracing::debug!(conn, "signal without roomCode or targetPeerId ignored");
                    return;
                }
                match self.directory.route_signal(room_code, target_peer_id) {
                    Some(target) => {
                        tracing::debug!(
                            from = %peer_id,
                            to = %target_peer_id,
                            kind = data.get("type").and_then(|t| t.as_str()).unwrap_or("candidate"),
                            "relay"
                        );
                        self.send(target, msg);
                    }
                    None => {
                        tracing::info!(room = %room_code, to = %target_peer_id, "relay-miss: target not in room");
                    }
                }
            }
            other => {
                tracing::debug!(conn, kind = other.message_type(), "server-bound message ignored");
            }
        }
    }

    fn handle_join(&mut self, conn: ConnId, room_code: String, peer_id: String) {
        match self.directory.join(conn, &room_code, &peer_id) {
            JoinOutcome::Full => {
                tracing::info!(peer = %peer_id, room = %room_code, "room-full");
                self.send(conn, SignalMessage::RoomFull { room_code, peer_id });
            }
            JoinOutcome::Joined {
                peers,
                notify,
                left,
            } => {
                if let Some(left) = left {
                    self.announce_leave(left);
                }
                tracing::info!(peer = %peer_id, room = %room_code, existing = ?peers, "join-room");

                self.send(
                    conn,
                    SignalMessage::RoomJoined {
                        room_code: room_code.clone(),
                        peer_id: peer_id.clone(),
                        data: RoomSnapshot { peers },
                    },
                );
                for target in notify {
                    self.send(
                        target,
                        SignalMessage::PeerJoined {
                            room_code: room_code.clone(),
                            peer_id: peer_id.clone(),
                        },
                    );
                }
            }
        }
    }

    fn announce_leave(&self, left: LeaveOutcome) {
        for target in &left.notify {
            self.send(
                *target,
                SignalMessage::PeerLeft {
                    room_code: left.room_code.clone(),
                    peer_id: left.peer_id.clone(),
                },
            );
        }
        if left.room_deleted {
            tracing::info!(room = %left.room_code, "room-deleted");
        }
    }
}

/// Rendezvous server bound to a socket
pub struct RendezvousServer {
    listener: TcpListener,
    config: RendezvousConfig,
}

impl RendezvousServer {
    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Io`] if binding fails.
    pub async fn bind(config: RendezvousConfig) -> Result<Self, RendezvousError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self { listener, config })
    }

    /// Bound address
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Io`] if the address cannot be determined.
    pub fn local_addr(&self) -> Result<SocketAddr, RendezvousError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Io`] if the listener fails.
    pub async fn run(self) -> Result<(), RendezvousError> {
        tracing::info!(addr = %self.local_addr()?, "rendezvous server listening");

        let (hub_tx, mut hub_rx) = mpsc::unbounded_channel();
        let mut hub = Hub {
            directory: RoomDirectory::new(self.config.max_room_size),
            outbound: HashMap::new(),
            started: Instant::now(),
        };
        tokio::spawn(async move {
            while let Some(event) = hub_rx.recv().await {
                hub.handle(event);
            }
        });

        let mut next_conn: ConnId = 0;
        loop {
            let (stream, remote) = self.listener.accept().await?;
            next_conn += 1;
            let conn = next_conn;
            let hub_tx = hub_tx.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_stream(stream, conn, hub_tx).await {
                    tracing::debug!(conn, addr = %remote, error = %e, "connection ended with error");
                }
            });
        }
    }
}

async fn handle_stream(
    stream: TcpStream,
    conn: ConnId,
    hub_tx: mpsc::UnboundedSender<HubEvent>,
) -> Result<(), RendezvousError> {
    let head = peek_request_head(&stream).await?;
    let text = String::from_utf8_lossy(&head).to_ascii_lowercase();

    if text.contains("upgrade: websocket") {
        serve_websocket(stream, conn, hub_tx).await
    } else {
        serve_http(stream, &head, hub_tx).await
    }
}

/// Peek at the request head without consuming it
async fn peek_request_head(stream: &TcpStream) -> Result<Vec<u8>, RendezvousError> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let mut last = 0;

    for _ in 0..50 {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            break;
        }
        let seen = &buf[..n];
        if n == buf.len() || seen.windows(4).any(|w| w == b"\r\n\r\n") {
            last = n;
            break;
        }
        if n == last {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        last = n;
    }

    buf.truncate(last);
    Ok(buf)
}

async fn serve_http(
    mut stream: TcpStream,
    head: &[u8],
    hub_tx: mpsc::UnboundedSender<HubEvent>,
) -> Result<(), RendezvousError> {
    // consume what was peeked
    let mut discard = vec![0u8; head.len()];
    stream.read_exact(&mut discard).await?;

    let head = String::from_utf8_lossy(head);
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let response = if path == "/health" || path.starts_with("/health?") {
        let (reply, rx) = oneshot::channel();
        let _ = hub_tx.send(HubEvent::Health { reply });
        let status = rx.await.map_err(|_| RendezvousError::Disconnected)?;
        let body = serde_json::to_string(&status)?;
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn serve_websocket(
    stream: TcpStream,
    conn: ConnId,
    hub_tx: mpsc::UnboundedSender<HubEvent>,
) -> Result<(), RendezvousError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalMessage>();
    if hub_tx
        .send(HubEvent::Connected {
            conn,
            outbound: out_tx,
        })
        .is_err()
    {
        return Err(RendezvousError::Disconnected);
    }

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode signaling message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                Ok(msg) => {
                    let _ = hub_tx.send(HubEvent::Message { conn, msg });
                }
                Err(e) => tracing::debug!(conn, error = %e, "unparseable signaling frame dropped"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn, error = %e, "websocket read failed");
                break;
            }
        }
    }

    // dropping the hub's sender ends the writer task
    let _ = hub_tx.send(HubEvent::Disconnected { conn });
    let _ = writer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> (Hub, Vec<mpsc::UnboundedReceiver<SignalMessage>>) {
        let mut hub = Hub {
            directory: RoomDirectory::new(2),
            outbound: HashMap::new(),
            started: Instant::now(),
        };
        let mut receivers = Vec::new();
        for conn in 1..=3 {
            let (tx, rx) = mpsc::unbounded_channel();
            hub.handle(HubEvent::Connected { conn, outbound: tx });
            receivers.push(rx);
        }
        (hub, receivers)
    }

    fn join(room: &str, peer: &str) -> SignalMessage {
        SignalMessage::JoinRoom {
            room_code: room.into(),
            peer_id: peer.into(),
        }
    }

    #[test]
    fn test_hub_join_notifies_room() {
        let (mut hub, mut rx) = hub();
        hub.handle(HubEvent::Message { conn: 1, msg: join("R", "a") });
        hub.handle(HubEvent::Message { conn: 2, msg: join("R", "b") });

        assert!(matches!(rx[0].try_recv().unwrap(), SignalMessage::RoomJoined { .. }));
        assert_eq!(
            rx[0].try_recv().unwrap(),
            SignalMessage::PeerJoined {
                room_code: "R".into(),
                peer_id: "b".into()
            }
        );
        match rx[1].try_recv().unwrap() {
            SignalMessage::RoomJoined { data, .. } => assert_eq!(data.peers, vec!["a"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_hub_room_full() {
        let (mut hub, mut rx) = hub();
        hub.handle(HubEvent::Message { conn: 1, msg: join("R", "a") });
        hub.handle(HubEvent::Message { conn: 2, msg: join("R", "b") });
        hub.handle(HubEvent::Message { conn: 3, msg: join("R", "c") });

        assert!(matches!(rx[2].try_recv().unwrap(), SignalMessage::RoomFull { .. }));
        assert_eq!(hub.directory.members("R"), vec!["a", "b"]);
    }

    #[test]
    fn test_hub_relays_signal_verbatim() {
        let (mut hub, mut rx) = hub();
        hub.handle(HubEvent::Message { conn: 1, msg: join("R", "a") });
        hub.handle(HubEvent::Message { conn: 2, msg: join("R", "b") });
        while rx[0].try_recv().is_ok() {}

        let signal = SignalMessage::Signal {
            room_code: "R".into(),
            peer_id: "b".into(),
            target_peer_id: "a".into(),
            data: serde_json::json!({ "type": "offer", "token": 1 }),
        };
        hub.handle(HubEvent::Message { conn: 2, msg: signal.clone() });
        assert_eq!(rx[0].try_recv().unwrap(), signal);

        // miss: dropped, nobody hears anything
        hub.handle(HubEvent::Message {
            conn: 2,
            msg: SignalMessage::Signal {
                room_code: "R".into(),
                peer_id: "b".into(),
                target_peer_id: "ghost".into(),
                data: serde_json::Value::Null,
            },
        });
        assert!(rx[0].try_recv().is_err());
        assert!(rx[1].try_recv().is_ok()); // room-joined only
        assert!(rx[1].try_recv().is_err());
    }

    #[test]
    fn test_hub_disconnect_announces_leave() {
        let (mut hub, mut rx) = hub();
        hub.handle(HubEvent::Message { conn: 1, msg: join("R", "a") });
        hub.handle(HubEvent::Message { conn: 2, msg: join("R", "b") });
        while rx[1].try_recv().is_ok() {}

        hub.handle(HubEvent::Disconnected { conn: 1 });
        assert_eq!(
            rx[1].try_recv().unwrap(),
            SignalMessage::PeerLeft {
                room_code: "R".into(),
                peer_id: "a".into()
            }
        );

        hub.handle(HubEvent::Disconnected { conn: 2 });
        assert_eq!(hub.directory.room_count(), 0);
    }

    #[test]
    fn test_hub_ignores_empty_fields() {
        let (mut hub, mut rx) = hub();
        hub.handle(HubEvent::Message { conn: 1, msg: join("", "a") });
        hub.handle(HubEvent::Message { conn: 1, msg: join("R", "") });
        assert!(rx[0].try_recv().is_err());
        assert_eq!(hub.directory.room_count(), 0);
    }

    #[test]
    fn test_config_defaults() {
        let config = RendezvousConfig::default();
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.max_room_size, 20);
    }
}
