//! # SWARMDROP Files
//!
//! File handling for the SWARMDROP transfer engine.
//!
//! This crate provides:
//! - File metadata and identifiers announced to peers
//! - Fixed-size chunking of in-memory file contents
//! - A sparse receive-side chunk store with ordered reassembly
//! - Per-file transfer status with monotonic transitions
//! - Saving reassembled files to disk

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod error;
pub mod sink;
pub mod store;
pub mod transfer;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub use chunker::FileChunker;
pub use error::FilesError;
pub use store::ChunkStore;
pub use transfer::{FileStatus, FileTransferStatus, TransferDirection};

/// Fixed protocol chunk size (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// MIME type used when none is declared
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// File identifier as announced on the wire
pub type FileId = String;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Metadata announced for every shared file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Unique file identifier
    pub id: FileId,
    /// File name
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Declared MIME type
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Number of chunks at [`CHUNK_SIZE`]
    pub total_chunks: u32,
}

impl FileMetadata {
    /// Build metadata for a file dropped now, generating a fresh id.
    pub fn new(name: impl Into<String>, size: u64, mime_type: Option<&str>) -> Self {
        let name = name.into();
        let id = generate_file_id(&name, size, unix_millis());
        let mime_type = match mime_type {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => DEFAULT_MIME_TYPE.to_string(),
        };

        Self {
            id,
            name,
            size,
            mime_type,
            total_chunks: FileChunker::new().chunk_count(size),
        }
    }
}

/// Generate a file id from name, size, creation time and a random suffix.
///
/// The suffix keeps repeated drops of the same file distinct.
#[must_use]
pub fn generate_file_id(name: &str, size: u64, created_ms: u64) -> FileId {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{name}-{size}-{created_ms}-{suffix}")
}

/// A locally shared file: metadata plus its full contents
#[derive(Debug, Clone)]
pub struct SharedFile {
    /// Announced metadata
    pub meta: FileMetadata,
    data: Arc<[u8]>,
}

impl SharedFile {
    /// Wrap in-memory contents as a shared file
    pub fn new(name: impl Into<String>, mime_type: Option<&str>, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let meta = FileMetadata::new(name, data.len() as u64, mime_type);
        Self { meta, data }
    }

    /// Read a file from disk
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::Io`] if the file cannot be read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FilesError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();

        tracing::debug!(file = %name, bytes = data.len(), "loaded shared file");

        Ok(Self::new(name, None, data))
    }

    /// File contents
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Chunk `index` of this file, if in range
    #[must_use]
    pub fn chunk(&self, index: u32) -> Option<&[u8]> {
        FileChunker::new().chunk(&self.data, index)
    }
}
