//! # SWARMDROP Core
//!
//! Core of the SWARMDROP room-based file sharing system.
//!
//! This crate provides:
//! - Frame encoding and decoding for the peer data channel
//! - Control message definitions
//! - The peer connection manager
//! - The transfer engine (send queue, late-joiner replay, receive verification)
//! - Swarm state with snapshot publication
//! - The swarm event loop tying it all together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Swarm event loop                           │
//! │   (commands, signaling, transport events, send progress, ticks) │
//! ├──────────────────────┬──────────────────────┬───────────────────┤
//! │  Connection manager  │   Transfer engine    │   Swarm state     │
//! ├──────────────────────┴──────────────────────┴───────────────────┤
//! │                         Frames                                   │
//! │   (0x00 control JSON | 0x01 chunk header + raw bytes)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod message;
pub mod node;

pub use error::FrameError;
pub use frame::{ChunkFrame, Frame};
pub use message::ControlMessage;
pub use node::{Swarm, SwarmConfig, SwarmError, SwarmHandle, SwarmState};

/// Frame marker for control messages
pub const CONTROL_MARKER: u8 = 0x00;

/// Frame marker for chunk messages
pub const CHUNK_MARKER: u8 = 0x01;

/// Bytes preceding the chunk header JSON (marker + u32 length)
pub const CHUNK_PREFIX_SIZE: usize = 5;
