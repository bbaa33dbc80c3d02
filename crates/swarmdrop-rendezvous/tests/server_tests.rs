//! End-to-end tests against a live rendezvous server.

use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use swarmdrop_rendezvous::{RendezvousClient, RendezvousConfig, RendezvousServer, SignalMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

async fn start_server(max_room_size: usize) -> SocketAddr {
    let config = RendezvousConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_room_size,
    };
    let server = RendezvousServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

async fn recv(rx: &mut UnboundedReceiver<SignalMessage>) -> SignalMessage {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for signaling message")
        .expect("connection closed")
}

async fn join(
    addr: SocketAddr,
    room: &str,
    peer: &str,
) -> (RendezvousClient, UnboundedReceiver<SignalMessage>, Vec<String>) {
    let (client, mut rx) = RendezvousClient::connect(&format!("ws://{addr}")).await.unwrap();
    client
        .send(SignalMessage::JoinRoom {
            room_code: room.to_string(),
            peer_id: peer.to_string(),
        })
        .unwrap();

    match recv(&mut rx).await {
        SignalMessage::RoomJoined { data, .. } => (client, rx, data.peers),
        other => panic!("expected room-joined, got {other:?}"),
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn test_join_snapshot_and_peer_joined() {
    let addr = start_server(20).await;

    let (_a, mut a_rx, peers) = join(addr, "ABCD12", "peer-a").await;
    assert!(peers.is_empty());

    let (_b, _b_rx, peers) = join(addr, "ABCD12", "peer-b").await;
    assert_eq!(peers, vec!["peer-a"]);

    assert_eq!(
        recv(&mut a_rx).await,
        SignalMessage::PeerJoined {
            room_code: "ABCD12".into(),
            peer_id: "peer-b".into()
        }
    );
}

#[tokio::test]
async fn test_signal_relay() {
    let addr = start_server(20).await;
    let (_a, mut a_rx, _) = join(addr, "ROOM01", "a").await;
    let (b, _b_rx, _) = join(addr, "ROOM01", "b").await;
    recv(&mut a_rx).await; // peer-joined

    let signal = SignalMessage::Signal {
        room_code: "ROOM01".into(),
        peer_id: "b".into(),
        target_peer_id: "a".into(),
        data: json!({ "type": "offer", "addr": "127.0.0.1:9" }),
    };
    b.send(signal.clone()).unwrap();
    assert_eq!(recv(&mut a_rx).await, signal);
}

#[tokio::test]
async fn test_room_full() {
    let addr = start_server(2).await;
    let (_a, _a_rx, _) = join(addr, "SMALL1", "a").await;
    let (_b, _b_rx, _) = join(addr, "SMALL1", "b").await;

    let (c, mut c_rx) = RendezvousClient::connect(&format!("ws://{addr}")).await.unwrap();
    c.send(SignalMessage::JoinRoom {
        room_code: "SMALL1".into(),
        peer_id: "c".into(),
    })
    .unwrap();

    assert!(matches!(recv(&mut c_rx).await, SignalMessage::RoomFull { .. }));
}

#[tokio::test]
async fn test_disconnect_announces_peer_left() {
    let addr = start_server(20).await;
    let (a, _a_rx, _) = join(addr, "BYE123", "a").await;
    let (_b, mut b_rx, _) = join(addr, "BYE123", "b").await;

    drop(a);

    assert_eq!(
        recv(&mut b_rx).await,
        SignalMessage::PeerLeft {
            room_code: "BYE123".into(),
            peer_id: "a".into()
        }
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_server(20).await;
    let (_a, _a_rx, _) = join(addr, "HEALTH", "a").await;

    let response = http_get(addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let value: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["rooms"], 1);
    assert!(value["uptime"].as_f64().unwrap() >= 0.0);

    let response = http_get(addr, "/nope").await;
    assert!(response.starts_with("HTTP/1.1 404"));
}
