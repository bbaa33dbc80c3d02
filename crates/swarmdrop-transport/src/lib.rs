//! # SWARMDROP Transport
//!
//! Point-to-point peer transports for SWARMDROP.
//!
//! The swarm never talks to a socket directly. It asks a [`TransportFactory`]
//! for a [`PeerTransport`], relays the negotiation payloads the transport
//! emits through the rendezvous service, and consumes [`TransportEvent`]s.
//!
//! This crate provides:
//! - The transport capability traits and event types
//! - An in-process memory transport with failure injection (tests, demos)
//! - A TCP transport whose negotiation payloads carry a socket address

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod tcp;
pub mod transport;

pub use memory::{MemoryNetwork, MemoryTransportFactory};
pub use tcp::{TcpTransportConfig, TcpTransportFactory};
pub use transport::{
    ConnectionId, EventEmitter, PeerTransport, TransportError, TransportEvent, TransportEventKind,
    TransportFactory, TransportResult,
};
