//! File chunking.

use crate::CHUNK_SIZE;
use std::ops::Range;

/// Splits file contents into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with the protocol chunk size
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size (zero is treated as one)
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a file
    #[must_use]
    pub fn chunk_count(&self, file_size: u64) -> u32 {
        file_size.div_ceil(self.chunk_size as u64) as u32
    }

    /// Byte range of chunk `index` within a file of `file_size` bytes
    #[must_use]
    pub fn chunk_range(&self, file_size: u64, index: u32) -> Option<Range<usize>> {
        if index >= self.chunk_count(file_size) {
            return None;
        }

        let start = index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(file_size as usize);
        Some(start..end)
    }

    /// Slice chunk `index` out of `data`
    #[must_use]
    pub fn chunk<'a>(&self, data: &'a [u8], index: u32) -> Option<&'a [u8]> {
        self.chunk_range(data.len() as u64, index)
            .map(|range| &data[range])
    }

    /// Iterate over `(index, chunk)` pairs in order
    pub fn chunks<'a>(&self, data: &'a [u8]) -> impl Iterator<Item = (u32, &'a [u8])> + 'a {
        data.chunks(self.chunk_size)
            .enumerate()
            .map(|(i, c)| (i as u32, c))
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        let chunker = FileChunker::new();
        assert_eq!(chunker.chunk_count(0), 0);
        assert_eq!(chunker.chunk_count(1), 1);
        assert_eq!(chunker.chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(chunker.chunk_count(CHUNK_SIZE as u64 + 1), 2);
        assert_eq!(chunker.chunk_count(200_000), 4);
    }

    #[test]
    fn test_last_chunk_is_short() {
        let chunker = FileChunker::new();
        let range = chunker.chunk_range(200_000, 3).unwrap();
        assert_eq!(range.len(), 3392);
        assert!(chunker.chunk_range(200_000, 4).is_none());
    }

    #[test]
    fn test_exact_multiple_has_full_last_chunk() {
        let chunker = FileChunker::with_chunk_size(10);
        let data = vec![1u8; 30];
        let sizes: Vec<usize> = chunker.chunks(&data).map(|(_, c)| c.len()).collect();
        assert_eq!(sizes, vec![10, 10, 10]);
    }

    #[test]
    fn test_chunk_slices_match_iterator() {
        let chunker = FileChunker::with_chunk_size(7);
        let data: Vec<u8> = (0..50).collect();
        for (index, chunk) in chunker.chunks(&data) {
            assert_eq!(chunker.chunk(&data, index), Some(chunk));
        }
    }

    #[test]
    fn test_zero_chunk_size_clamped() {
        let chunker = FileChunker::with_chunk_size(0);
        assert_eq!(chunker.chunk_size(), 1);
        assert_eq!(chunker.chunk_count(3), 3);
    }
}
