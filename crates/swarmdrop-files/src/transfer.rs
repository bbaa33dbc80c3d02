//! Per-file transfer status.

use crate::{FileId, FileMetadata, unix_millis};
use serde::{Deserialize, Serialize};

/// Transfer status of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileTransferStatus {
    /// Shared locally, not yet sent
    Pending,
    /// Chunks being pushed to peers
    Sending,
    /// Chunks arriving from peers
    Receiving,
    /// Every chunk sent or received
    Complete,
}

impl FileTransferStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sending | Self::Receiving => 1,
            Self::Complete => 2,
        }
    }
}

impl std::fmt::Display for FileTransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Sending => write!(f, "Sending"),
            Self::Receiving => write!(f, "Receiving"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferDirection {
    /// Sending file
    Sending,
    /// Receiving file
    Receiving,
}

/// Progress record of a single file in one direction
///
/// Status only ever moves forward: `pending → sending|receiving → complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    /// File identifier
    pub file_id: FileId,
    /// Current status
    pub status: FileTransferStatus,
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// Chunks sent or received
    pub chunks_done: u32,
    /// Chunks expected
    pub total_chunks: u32,
    /// Bytes sent or received
    pub bytes_done: u64,
    /// Bytes expected
    pub total_bytes: u64,
    /// Creation time (Unix millis)
    pub started_at: u64,
    /// Completion time (Unix millis)
    pub completed_at: Option<u64>,
}

impl FileStatus {
    fn new(meta: &FileMetadata, status: FileTransferStatus, direction: TransferDirection) -> Self {
        Self {
            file_id: meta.id.clone(),
            status,
            direction,
            chunks_done: 0,
            total_chunks: meta.total_chunks,
            bytes_done: 0,
            total_bytes: meta.size,
            started_at: unix_millis(),
            completed_at: None,
        }
    }

    /// Status for a locally shared file not yet sent
    #[must_use]
    pub fn pending(meta: &FileMetadata) -> Self {
        Self::new(meta, FileTransferStatus::Pending, TransferDirection::Sending)
    }

    /// Status for a file announced by a peer
    #[must_use]
    pub fn receiving(meta: &FileMetadata) -> Self {
        Self::new(meta, FileTransferStatus::Receiving, TransferDirection::Receiving)
    }

    fn advance(&mut self, next: FileTransferStatus) -> bool {
        if next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        if next == FileTransferStatus::Complete {
            self.completed_at = Some(unix_millis());
        }
        true
    }

    /// Move a pending file to `sending`. No-op once past pending.
    pub fn begin_sending(&mut self) -> bool {
        self.advance(FileTransferStatus::Sending)
    }

    /// Account for one more chunk. Returns `true` if this completed the file.
    pub fn record_chunk(&mut self, bytes: u64) -> bool {
        self.chunks_done = self.chunks_done.saturating_add(1);
        self.bytes_done += bytes;
        if self.chunks_done >= self.total_chunks {
            return self.advance(FileTransferStatus::Complete);
        }
        false
    }

    /// Mark complete. Returns `true` on the transition, `false` if already complete.
    pub fn complete(&mut self) -> bool {
        self.advance(FileTransferStatus::Complete)
    }

    /// Whether the file is complete
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == FileTransferStatus::Complete
    }

    /// Whether the file has not started sending
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == FileTransferStatus::Pending
    }

    /// Progress fraction (0.0 to 1.0)
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.is_complete() || self.total_bytes == 0 {
            return if self.is_complete() { 1.0 } else { 0.0 };
        }
        (self.bytes_done as f64 / self.total_bytes as f64).min(1.0)
    }
}
