//! Swarm state.
//!
//! One authoritative [`SwarmState`] is owned by the swarm event loop and
//! mutated through the synchronous methods below. Observers only ever see
//! immutable `Arc<SwarmState>` snapshots.

use super::stats::TransferStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use swarmdrop_files::{FileId, FileMetadata, FileStatus, TransferDirection, unix_millis};

/// Role of a peer in the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Holds shared files
    Seeder,
    /// Downloading
    Leecher,
    /// Role not yet known
    Peer,
}

/// Connection status of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Transport negotiating
    Connecting,
    /// Transport open
    Active,
    /// Transport closed or failed
    Disconnected,
}

/// A peer known to this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Peer id
    pub id: String,
    /// Display name from the handshake
    pub display_name: String,
    /// Role
    pub role: PeerRole,
    /// Connection status
    pub status: PeerStatus,
    /// Chunks sent to the peer
    pub chunks_sent: u64,
    /// Chunks received from the peer
    pub chunks_received: u64,
    /// Bytes sent to the peer
    pub bytes_sent: u64,
    /// Bytes received from the peer
    pub bytes_received: u64,
    /// Last activity (Unix millis)
    pub last_seen: u64,
}

impl PeerInfo {
    /// New peer with zeroed counters
    #[must_use]
    pub fn new(id: impl Into<String>, role: PeerRole, status: PeerStatus) -> Self {
        let id = id.into();
        Self {
            display_name: super::config::fallback_name(&id),
            id,
            role,
            status,
            chunks_sent: 0,
            chunks_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            last_seen: unix_millis(),
        }
    }
}

/// Aggregate transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Nothing moving
    #[default]
    Idle,
    /// Files being sent or received
    Active,
    /// Every catalogue file complete
    Complete,
    /// Unrecoverable room error
    Error,
}

/// Chat log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message id
    pub id: String,
    /// Text
    pub text: String,
    /// Sender's display name
    pub sender_name: String,
    /// Sender's peer id
    pub sender_id: String,
    /// Unix millis
    pub timestamp: u64,
    /// Sent by this node
    pub is_own: bool,
}

/// Everything a swarm node knows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmState {
    /// Local peer id
    pub peer_id: String,
    /// Current room
    pub room_code: Option<String>,
    /// Whether this node hosts the room
    pub is_host: bool,
    /// Known peers, in discovery order
    pub peers: Vec<PeerInfo>,
    /// File catalogue (local and announced), in arrival order
    pub files: Vec<FileMetadata>,
    /// Per-file status
    pub file_status: HashMap<FileId, FileStatus>,
    /// Aggregate state
    pub transfer_state: TransferState,
    /// Aggregate statistics
    pub stats: TransferStats,
    /// Last error notice
    pub error: Option<String>,
    /// Chat log
    pub messages: Vec<ChatMessage>,
}

impl SwarmState {
    /// Fresh state for a node
    #[must_use]
    pub fn new(peer_id: impl Into<String>, is_host: bool) -> Self {
        Self {
            peer_id: peer_id.into(),
            is_host,
            ..Default::default()
        }
    }

    // ---- peers ----

    /// Look up a peer
    #[must_use]
    pub fn peer(&self, peer_id: &str) -> Option<&PeerInfo> {
        self.peers.iter().find(|p| p.id == peer_id)
    }

    fn peer_mut(&mut self, peer_id: &str) -> Option<&mut PeerInfo> {
        self.peers.iter_mut().find(|p| p.id == peer_id)
    }

    /// Add a peer. An already known peer is left untouched.
    pub fn add_peer(&mut self, peer_id: &str, role: PeerRole, status: PeerStatus) -> bool {
        if peer_id == self.peer_id || self.peer(peer_id).is_some() {
            return false;
        }
        self.peers.push(PeerInfo::new(peer_id, role, status));
        true
    }

    /// Remove a peer
    pub fn remove_peer(&mut self, peer_id: &str) -> Option<PeerInfo> {
        let pos = self.peers.iter().position(|p| p.id == peer_id)?;
        Some(self.peers.remove(pos))
    }

    /// Set a peer's connection status
    pub fn set_peer_status(&mut self, peer_id: &str, status: PeerStatus) -> bool {
        match self.peer_mut(peer_id) {
            Some(peer) => {
                peer.status = status;
                peer.last_seen = unix_millis();
                true
            }
            None => false,
        }
    }

    /// Apply a handshake: name, role, and `active` status. Adds the peer if unknown.
    pub fn apply_handshake(&mut self, peer_id: &str, display_name: String, role: PeerRole) {
        self.add_peer(peer_id, role, PeerStatus::Active);
        if let Some(peer) = self.peer_mut(peer_id) {
            peer.display_name = display_name;
            peer.role = role;
            peer.status = PeerStatus::Active;
            peer.last_seen = unix_millis();
        }
    }

    /// Count a chunk sent to a peer
    pub fn record_sent(&mut self, peer_id: &str, bytes: u64) {
        if let Some(peer) = self.peer_mut(peer_id) {
            peer.chunks_sent += 1;
            peer.bytes_sent += bytes;
        }
    }

    /// Count a chunk received from a peer
    pub fn record_received(&mut self, peer_id: &str, bytes: u64) {
        if let Some(peer) = self.peer_mut(peer_id) {
            peer.chunks_received += 1;
            peer.bytes_received += bytes;
            peer.last_seen = unix_millis();
        }
    }

    /// Peers with an open transport
    #[must_use]
    pub fn active_peer_count(&self) -> usize {
        self.peers.iter().filter(|p| p.status == PeerStatus::Active).count()
    }

    // ---- files ----

    /// Look up file metadata
    #[must_use]
    pub fn file(&self, file_id: &str) -> Option<&FileMetadata> {
        self.files.iter().find(|f| f.id == file_id)
    }

    /// Add a locally shared file with `pending` status
    pub fn add_local_file(&mut self, meta: FileMetadata) {
        self.file_status.insert(meta.id.clone(), FileStatus::pending(&meta));
        self.files.push(meta);
        self.recompute_totals();
    }

    /// Merge announced files; returns the ones not seen before.
    ///
    /// New files get a `receiving` status.
    pub fn merge_files(&mut self, files: Vec<FileMetadata>) -> Vec<FileMetadata> {
        let mut added = Vec::new();
        for meta in files {
            if self.file(&meta.id).is_some() {
                continue;
            }
            self.file_status.insert(meta.id.clone(), FileStatus::receiving(&meta));
            self.files.push(meta.clone());
            added.push(meta);
        }
        if !added.is_empty() {
            self.recompute_totals();
        }
        added
    }

    /// Remove a file, only while it is still `pending`
    pub fn remove_pending_file(&mut self, file_id: &str) -> bool {
        if !self.file_status.get(file_id).is_some_and(FileStatus::is_pending) {
            return false;
        }
        self.file_status.remove(file_id);
        self.files.retain(|f| f.id != file_id);
        self.recompute_totals();
        true
    }

    /// Status of one file
    #[must_use]
    pub fn status(&self, file_id: &str) -> Option<&FileStatus> {
        self.file_status.get(file_id)
    }

    /// Mutable status of one file
    pub fn status_mut(&mut self, file_id: &str) -> Option<&mut FileStatus> {
        self.file_status.get_mut(file_id)
    }

    /// Mark a file complete. Returns `true` on the transition.
    pub fn complete_file(&mut self, file_id: &str) -> bool {
        self.file_status.get_mut(file_id).is_some_and(FileStatus::complete)
    }

    /// Whether every catalogue file is complete (false for an empty catalogue)
    #[must_use]
    pub fn all_files_complete(&self) -> bool {
        !self.files.is_empty()
            && self
                .files
                .iter()
                .all(|f| self.file_status.get(&f.id).is_some_and(FileStatus::is_complete))
    }

    /// Ids of files received in full
    #[must_use]
    pub fn completed_downloads(&self) -> Vec<FileId> {
        self.files
            .iter()
            .filter(|f| {
                self.file_status.get(&f.id).is_some_and(|s| {
                    s.direction == TransferDirection::Receiving && s.is_complete()
                })
            })
            .map(|f| f.id.clone())
            .collect()
    }

    /// Recompute aggregate totals from the catalogue
    pub fn recompute_totals(&mut self) {
        self.stats.total_bytes = self.files.iter().map(|f| f.size).sum();
        self.stats.total_chunks = self.files.iter().map(|f| u64::from(f.total_chunks)).sum();
    }

    // ---- aggregate ----

    /// Enter `active` from `idle`, stamping the start time
    pub fn activate(&mut self) {
        if self.transfer_state == TransferState::Idle {
            self.transfer_state = TransferState::Active;
        }
        if self.stats.start_time.is_none() {
            self.stats.start_time = Some(unix_millis());
        }
    }

    /// Enter `complete` if every file is complete. Returns `true` exactly once.
    pub fn check_all_complete(&mut self) -> bool {
        if self.transfer_state == TransferState::Complete || !self.all_files_complete() {
            return false;
        }
        self.transfer_state = TransferState::Complete;
        true
    }

    /// Set the error notice
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Clear the error notice
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Append to the chat log
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Back to an empty, room-less state (identity kept)
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.peer_id), self.is_host);
    }
}
