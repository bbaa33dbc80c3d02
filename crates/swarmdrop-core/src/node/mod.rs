//! Swarm node layer for SWARMDROP
//!
//! This module provides the high-level swarm API that coordinates every
//! component of a room member:
//! - Peer transports (via swarmdrop-transport), one per remote peer
//! - Rendezvous signaling (via swarmdrop-rendezvous messages)
//! - File chunking and reassembly (via swarmdrop-files)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    SwarmHandle                           │
//! │  (commands in, Arc<SwarmState> snapshots out)           │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Swarm event loop                      │
//! ├──────────────────┬──────────────────┬───────────────────┤
//! │  Connections     │  Transfer engine │  State + stats    │
//! └──────────────────┴──────────────────┴───────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarmdrop_core::node::{Swarm, SwarmConfig};
//! use swarmdrop_files::SharedFile;
//! use swarmdrop_rendezvous::RendezvousClient;
//! use swarmdrop_transport::TcpTransportFactory;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, inbound) = RendezvousClient::connect("ws://127.0.0.1:3001").await?;
//!     let swarm = Swarm::spawn(
//!         SwarmConfig::host(),
//!         Arc::new(TcpTransportFactory::default()),
//!         client.sender(),
//!     );
//!     swarm.attach_signaling(inbound);
//!
//!     swarm.add_files(vec![SharedFile::open("document.pdf").await?]).await?;
//!     swarm.join_room("ABC234").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod mesh;
pub mod state;
pub mod stats;
pub mod swarm;

pub use config::{PeerSelection, RetryConfig, SwarmConfig, TransferConfig};
pub use connection::{ConnectionEvent, ConnectionManager};
pub use engine::{EngineEvent, TransferEngine};
pub use error::SwarmError;
pub use mesh::{generate_peer_id, generate_room_code, parse_room_code, select_peers};
pub use state::{ChatMessage, PeerInfo, PeerRole, PeerStatus, SwarmState, TransferState};
pub use stats::{SpeedMeter, TransferStats};
pub use swarm::{SIGNALING_LOST_NOTICE, Swarm, SwarmHandle};
