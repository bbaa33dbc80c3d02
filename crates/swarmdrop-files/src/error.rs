//! Error types for file handling.

use thiserror::Error;

/// File-level errors
#[derive(Debug, Error)]
pub enum FilesError {
    /// No metadata or chunks known for the file
    #[error("unknown file: {0}")]
    UnknownFile(String),

    /// Not all chunks have arrived yet
    #[error("file {file_id} incomplete: {have}/{total} chunks")]
    Incomplete {
        /// File identifier
        file_id: String,
        /// Chunks stored
        have: usize,
        /// Chunks expected
        total: u32,
    },

    /// A chunk is absent even though the file was believed complete
    #[error("file {file_id} is missing chunk {index}")]
    MissingChunk {
        /// File identifier
        file_id: String,
        /// Missing chunk index
        index: u32,
    },

    /// File I/O error
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}
