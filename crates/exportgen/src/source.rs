use crate::{content::generate, plan::LogicalFile};
use bytes::Bytes;
use core::iter::FusedIterator;

/// Maximum size of a generated chunk (1 MiB).
pub const CHUNK_SIZE: u32 = 1024 * 1024;

/// The unit of lazily generated content moved through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Archive-wide unique chunk number, embedded in the content.
    pub global_index: u64,
    pub bytes: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Pull-based producer of one file's content.
///
/// Each call to [`Iterator::next`] generates at most [`CHUNK_SIZE`] bytes. The
/// last chunk is truncated so that exactly `target_size_bytes` are produced.
/// Once exhausted the source keeps returning `None`. Content is a pure
/// function of the chunk id, so a clone replays the same bytes.
#[derive(Debug, Clone)]
pub struct ChunkSource {
    first_chunk_id: u64,
    emitted: u64,
    target: u64,
}

impl ChunkSource {
    pub const fn new(first_chunk_id: u64, target_size_bytes: u64) -> Self {
        Self {
            first_chunk_id,
            emitted: 0,
            target: target_size_bytes,
        }
    }

    pub const fn for_file(file: &LogicalFile) -> Self {
        Self::new(file.first_chunk_id, file.target_size_bytes)
    }

    /// Bytes not yet produced.
    pub const fn remaining(&self) -> u64 {
        self.target.saturating_sub(self.emitted)
    }
}

impl Iterator for ChunkSource {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.emitted >= self.target {
            return None;
        }

        let size = self.remaining().min(u64::from(CHUNK_SIZE)) as u32;
        let global_index = self.first_chunk_id + self.emitted / u64::from(CHUNK_SIZE);
        let bytes = generate(global_index, size);
        self.emitted += u64::from(size);

        Some(Chunk {
            global_index,
            bytes,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining().div_ceil(u64::from(CHUNK_SIZE));
        let n = usize::try_from(n).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

impl FusedIterator for ChunkSource {}
