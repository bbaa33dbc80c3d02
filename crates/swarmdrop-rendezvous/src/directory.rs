//! Room directory.
//!
//! Owned by exactly one task. Every operation returns the connections that
//! need to hear about the change; the caller does the sending, which keeps
//! this module free of I/O and trivially testable.

use crate::DEFAULT_MAX_ROOM_SIZE;
use std::collections::HashMap;

/// Server-assigned connection identifier
pub type ConnId = u64;

#[derive(Debug, Clone)]
struct Member {
    peer_id: String,
    conn: ConnId,
}

/// Result of a join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Joined; `peers` is the member list taken before the insert
    Joined {
        /// Members present before the joiner, in join order
        peers: Vec<String>,
        /// Connections to notify with `peer-joined`
        notify: Vec<ConnId>,
        /// The connection's previous membership, if it moved rooms
        left: Option<LeaveOutcome>,
    },
    /// Room at capacity, nothing changed
    Full,
}

/// Result of a member leaving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Room the member left
    pub room_code: String,
    /// Peer that left
    pub peer_id: String,
    /// Remaining members to notify with `peer-left`
    pub notify: Vec<ConnId>,
    /// Whether the room was deleted
    pub room_deleted: bool,
}

/// Rooms and their members
#[derive(Debug)]
pub struct RoomDirectory {
    rooms: HashMap<String, Vec<Member>>,
    sessions: HashMap<ConnId, (String, String)>,
    max_room_size: usize,
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROOM_SIZE)
    }
}

impl RoomDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new(max_room_size: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            sessions: HashMap::new(),
            max_room_size,
        }
    }

    /// Join `room_code` as `peer_id` over connection `conn`.
    ///
    /// A full room is checked first and rejects without touching anything.
    /// A connection already in another room leaves it first. A peer id that
    /// is already a member is re-bound to the new connection.
    pub fn join(&mut self, conn: ConnId, room_code: &str, peer_id: &str) -> JoinOutcome {
        let already_member = self
            .rooms
            .get(room_code)
            .is_some_and(|members| members.iter().any(|m| m.peer_id == peer_id));
        let size = self.rooms.get(room_code).map_or(0, Vec::len);

        if !already_member && size >= self.max_room_size {
            return JoinOutcome::Full;
        }

        let left = match self.sessions.get(&conn) {
            Some((room, peer)) if room == room_code && peer == peer_id => None,
            Some(_) => self.leave(conn),
            None => None,
        };

        let members = self.rooms.entry(room_code.to_string()).or_default();

        if let Some(existing) = members.iter_mut().find(|m| m.peer_id == peer_id) {
            if existing.conn != conn {
                tracing::debug!(room = %room_code, peer = %peer_id, "peer id re-bound to new connection");
                self.sessions.remove(&existing.conn);
                existing.conn = conn;
            }
        } else {
            members.push(Member {
                peer_id: peer_id.to_string(),
                conn,
            });
        }

        let (peers, notify) = members
            .iter()
            .filter(|m| m.peer_id != peer_id)
            .map(|m| (m.peer_id.clone(), m.conn))
            .unzip();

        self.sessions
            .insert(conn, (room_code.to_string(), peer_id.to_string()));

        JoinOutcome::Joined {
            peers,
            notify,
            left,
        }
    }

    /// Connection of `target_peer_id` in `room_code`, if present
    #[must_use]
    pub fn route_signal(&self, room_code: &str, target_peer_id: &str) -> Option<ConnId> {
        self.rooms
            .get(room_code)?
            .iter()
            .find(|m| m.peer_id == target_peer_id)
            .map(|m| m.conn)
    }

    /// Remove whatever membership `conn` holds
    pub fn leave(&mut self, conn: ConnId) -> Option<LeaveOutcome> {
        let (room_code, peer_id) = self.sessions.remove(&conn)?;
        let members = self.rooms.get_mut(&room_code)?;

        members.retain(|m| !(m.peer_id == peer_id && m.conn == conn));
        let notify = members.iter().map(|m| m.conn).collect();
        let room_deleted = members.is_empty();
        if room_deleted {
            self.rooms.remove(&room_code);
        }

        Some(LeaveOutcome {
            room_code,
            peer_id,
            notify,
            room_deleted,
        })
    }

    /// Number of live rooms
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Member ids of a room, in join order
    #[must_use]
    pub fn members(&self, room_code: &str) -> Vec<String> {
        self.rooms
            .get(room_code)
            .map(|members| members.iter().map(|m| m.peer_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Room and peer id bound to a connection
    #[must_use]
    pub fn session(&self, conn: ConnId) -> Option<(&str, &str)> {
        self.sessions
            .get(&conn)
            .map(|(room, peer)| (room.as_str(), peer.as_str()))
    }
}
