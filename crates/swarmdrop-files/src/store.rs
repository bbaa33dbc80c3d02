//! Receive-side chunk storage and reassembly.
//!
//! Chunks arrive out of order and possibly from several peers at once, so
//! storage is keyed by `(file id, chunk index)` and never assumes a global
//! sequence. The first copy of a chunk wins; later duplicates are ignored.

use crate::FileId;
use crate::error::FilesError;
use std::collections::{BTreeMap, HashMap};

/// Sparse per-file chunk maps
#[derive(Debug, Default)]
pub struct ChunkStore {
    files: HashMap<FileId, BTreeMap<u32, Vec<u8>>>,
}

impl ChunkStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a (possibly empty) chunk map exists for `file_id`
    pub fn ensure(&mut self, file_id: &str) {
        self.chunks_mut(file_id);
    }

    fn chunks_mut(&mut self, file_id: &str) -> &mut BTreeMap<u32, Vec<u8>> {
        self.files.entry(file_id.to_string()).or_default()
    }

    /// Store a chunk. Returns `false` if the index was already present.
    pub fn insert(&mut self, file_id: &str, index: u32, data: Vec<u8>) -> bool {
        let chunks = self.chunks_mut(file_id);
        if chunks.contains_key(&index) {
            return false;
        }
        chunks.insert(index, data);
        true
    }

    /// Whether a chunk is stored
    #[must_use]
    pub fn contains(&self, file_id: &str, index: u32) -> bool {
        self.files
            .get(file_id)
            .is_some_and(|chunks| chunks.contains_key(&index))
    }

    /// Whether any chunk map exists for the file
    #[must_use]
    pub fn has_file(&self, file_id: &str) -> bool {
        self.files.contains_key(file_id)
    }

    /// Number of distinct chunks stored for a file
    #[must_use]
    pub fn count(&self, file_id: &str) -> usize {
        self.files.get(file_id).map_or(0, BTreeMap::len)
    }

    /// Bytes stored for a file
    #[must_use]
    pub fn stored_bytes(&self, file_id: &str) -> u64 {
        self.files
            .get(file_id)
            .map_or(0, |chunks| chunks.values().map(|c| c.len() as u64).sum())
    }

    /// Whether every index in `0..total` is present
    #[must_use]
    pub fn is_complete(&self, file_id: &str, total: u32) -> bool {
        match self.files.get(file_id) {
            Some(chunks) => chunks.range(0..total).count() == total as usize,
            None => total == 0,
        }
    }

    /// Drop chunks with an index of `total` or above. Returns how many went.
    pub fn truncate(&mut self, file_id: &str, total: u32) -> usize {
        let Some(chunks) = self.files.get_mut(file_id) else {
            return 0;
        };
        let dropped = chunks.split_off(&total);
        dropped.len()
    }

    /// Indices in `0..total` not yet stored
    #[must_use]
    pub fn missing(&self, file_id: &str, total: u32) -> Vec<u32> {
        match self.files.get(file_id) {
            Some(chunks) => (0..total).filter(|i| !chunks.contains_key(i)).collect(),
            None => (0..total).collect(),
        }
    }

    /// Concatenate chunks `0..total` in index order.
    ///
    /// # Errors
    ///
    /// - [`FilesError::UnknownFile`] if nothing is stored for the file and it
    ///   is not empty
    /// - [`FilesError::Incomplete`] if fewer than `total` chunks are stored
    /// - [`FilesError::MissingChunk`] if the count matches but an index in
    ///   range is absent
    pub fn reassemble(&self, file_id: &str, total: u32) -> Result<Vec<u8>, FilesError> {
        let chunks = match self.files.get(file_id) {
            Some(chunks) => chunks,
            None if total == 0 => return Ok(Vec::new()),
            None => return Err(FilesError::UnknownFile(file_id.to_string())),
        };

        if chunks.len() < total as usize {
            return Err(FilesError::Incomplete {
                file_id: file_id.to_string(),
                have: chunks.len(),
                total,
            });
        }

        let size: usize = chunks.range(0..total).map(|(_, c)| c.len()).sum();
        let mut out = Vec::with_capacity(size);
        for index in 0..total {
            let chunk = chunks.get(&index).ok_or_else(|| FilesError::MissingChunk {
                file_id: file_id.to_string(),
                index,
            })?;
            out.extend_from_slice(chunk);
        }

        Ok(out)
    }

    /// Drop all chunks of a file
    pub fn remove(&mut self, file_id: &str) {
        self.files.remove(file_id);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Number of files with a chunk map
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}
