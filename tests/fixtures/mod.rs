//! Test fixtures

pub mod room;

pub use room::{RoomFixture, TestPeer, test_data, wait_until};
