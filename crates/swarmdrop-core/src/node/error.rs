//! Error types for the swarm API

use std::borrow::Cow;
use swarmdrop_files::FilesError;
use thiserror::Error;

/// Errors returned by [`SwarmHandle`](super::SwarmHandle) operations
#[derive(Debug, Error)]
pub enum SwarmError {
    /// File not in the catalogue
    #[error("Unknown file: {0}")]
    UnknownFile(String),

    /// File handling failed (incomplete, missing chunk, I/O)
    #[error("File error: {0}")]
    Files(#[from] FilesError),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// The swarm event loop is gone
    #[error("Swarm event loop stopped")]
    Stopped,
}

impl SwarmError {
    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        SwarmError::InvalidState(Cow::Borrowed(context))
    }

    /// Whether the error concerns a single file only
    #[must_use]
    pub fn is_file_scoped(&self) -> bool {
        matches!(self, SwarmError::UnknownFile(_) | SwarmError::Files(_))
    }
}

/// Result alias for swarm operations
pub type Result<T> = std::result::Result<T, SwarmError>;
