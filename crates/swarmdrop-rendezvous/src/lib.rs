//! # SWARMDROP Rendezvous
//!
//! Room-based rendezvous service for SWARMDROP peers.
//!
//! Peers connect over a WebSocket, join a room by its short code, learn who is
//! already there, and relay opaque connection-negotiation payloads to named
//! members of the same room. The service never sees file data.
//!
//! This crate provides:
//! - The signaling wire protocol ([`protocol`])
//! - The room directory ([`directory`]), a plain synchronous data structure
//! - The server ([`server`]): one hub task owning the directory, one task per
//!   connection, plus a `/health` liveness probe on the same port
//! - A WebSocket client ([`client`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod directory;
pub mod protocol;
pub mod server;

pub use client::RendezvousClient;
pub use directory::{JoinOutcome, LeaveOutcome, RoomDirectory};
pub use protocol::{RendezvousError, RoomSnapshot, SignalMessage};
pub use server::{HealthStatus, RendezvousConfig, RendezvousServer};

/// Default listening port
pub const DEFAULT_PORT: u16 = 3001;

/// Default maximum members per room
pub const DEFAULT_MAX_ROOM_SIZE: usize = 20;
