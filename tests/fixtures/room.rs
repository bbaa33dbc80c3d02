//! Room fixture for integration testing
//!
//! Runs a real rendezvous server on a loopback port and attaches swarm nodes
//! to it. Peer links use the in-process memory transport so that tests can
//! make individual peers unreachable.
//!
//! # Example
//!
//! ```no_run
//! use swarmdrop_integration_tests::fixtures::RoomFixture;
//!
//! #[tokio::test]
//! async fn test_two_peers() {
//!     let fixture = RoomFixture::start(20).await.unwrap();
//!     let host = fixture.peer("aaaa1111", true).await.unwrap();
//!     host.handle.join_room("ABC234").await.unwrap();
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarmdrop_core::node::{RetryConfig, Swarm, SwarmConfig, SwarmHandle, SwarmState};
use swarmdrop_rendezvous::{
    RendezvousClient, RendezvousConfig, RendezvousError, RendezvousServer, SignalMessage,
};
use swarmdrop_transport::MemoryNetwork;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Default time a test waits for a state change
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause after a join so that later joiners see this member
pub const JOIN_SETTLE: Duration = Duration::from_millis(100);

/// A rendezvous server plus the memory network its peers share
pub struct RoomFixture {
    /// Server address
    pub addr: SocketAddr,
    /// Peer-to-peer network
    pub network: MemoryNetwork,
    server: JoinHandle<Result<(), RendezvousError>>,
}

/// One swarm node attached to the fixture's server
pub struct TestPeer {
    /// Swarm handle
    pub handle: SwarmHandle,
    client: RendezvousClient,
}

impl RoomFixture {
    /// Start a server allowing `max_room_size` members per room
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind.
    pub async fn start(max_room_size: usize) -> Result<Self, RendezvousError> {
        let config = RendezvousConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_room_size,
        };
        let server = RendezvousServer::bind(config).await?;
        let addr = server.local_addr()?;
        let server = tokio::spawn(server.run());

        Ok(Self {
            addr,
            network: MemoryNetwork::new(),
            server,
        })
    }

    /// WebSocket URL of the server
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connect a swarm node with the default test configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket handshake fails.
    pub async fn peer(&self, peer_id: &str, is_host: bool) -> Result<TestPeer, RendezvousError> {
        let config = SwarmConfig {
            peer_id: Some(peer_id.to_string()),
            is_host,
            retry: RetryConfig {
                max_retries: 3,
                step: Duration::from_millis(20),
            },
            ..SwarmConfig::default()
        };
        self.peer_with(config).await
    }

    /// Connect a swarm node with an explicit configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket handshake fails.
    pub async fn peer_with(&self, config: SwarmConfig) -> Result<TestPeer, RendezvousError> {
        let peer_id = config.peer_id.clone().unwrap_or_default();
        let (client, inbound) = RendezvousClient::connect(&self.url()).await?;
        let handle = Swarm::spawn(config, Arc::new(self.network.factory(peer_id)), client.sender());
        handle.attach_signaling(inbound);
        Ok(TestPeer { handle, client })
    }

    /// Connect a bare signaling client
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket handshake fails.
    pub async fn raw_client(&self) -> Result<(RendezvousClient, UnboundedReceiver<SignalMessage>), RendezvousError> {
        RendezvousClient::connect(&self.url()).await
    }
}

impl Drop for RoomFixture {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl TestPeer {
    /// Join `room` and give the server time to register the membership
    pub async fn join(&self, room: &str) {
        self.handle.join_room(room).await.expect("join_room failed");
        tokio::time::sleep(JOIN_SETTLE).await;
    }

    /// Leave the room and drop the signaling link
    pub async fn leave(self) {
        let _ = self.handle.leave_room().await;
        self.handle.shutdown();
        self.client.close();
    }
}

/// Wait until `handle` publishes a state satisfying `predicate`
///
/// # Panics
///
/// Panics if [`WAIT_TIMEOUT`] elapses first.
pub async fn wait_until(
    handle: &SwarmHandle,
    predicate: impl FnMut(&SwarmState) -> bool,
) -> Arc<SwarmState> {
    tokio::time::timeout(WAIT_TIMEOUT, handle.wait_for(predicate))
        .await
        .expect("timed out waiting for swarm state")
        .expect("swarm stopped")
}

/// Deterministic test payload
#[must_use]
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
