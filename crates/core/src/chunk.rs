//! Chunk numbering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 1-based chunk sequence number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct ChunkNumber(u32);

impl ChunkNumber {
    /// The first chunk of every upload.
    pub const FIRST: ChunkNumber = ChunkNumber(1);

    /// Create a chunk number, rejecting zero.
    pub fn new(n: u32) -> crate::Result<Self> {
        if n == 0 {
            return Err(crate::Error::InvalidChunkNumber(0));
        }
        Ok(Self(n))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Iterate `1..=count` in ascending order.
    pub fn range(count: u32) -> impl DoubleEndedIterator<Item = ChunkNumber> + Clone {
        (1..=count).map(ChunkNumber)
    }
}

impl TryFrom<i64> for ChunkNumber {
    type Error = crate::Error;

    fn try_from(value: i64) -> crate::Result<Self> {
        match u32::try_from(value) {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(crate::Error::InvalidChunkNumber(value)),
        }
    }
}

impl From<ChunkNumber> for u32 {
    fn from(n: ChunkNumber) -> Self {
        n.0
    }
}

impl fmt::Debug for ChunkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkNumber({})", self.0)
    }
}

impl fmt::Display for ChunkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of chunks needed to carry `size` bytes at `chunk_size` bytes each.
pub fn chunk_count(size: u64, chunk_size: u64) -> crate::Result<u32> {
    if chunk_size == 0 {
        return Err(crate::Error::InvalidChunkSize {
            size: 0,
            min: crate::MIN_CHUNK_SIZE,
            max: crate::MAX_CHUNK_SIZE,
        });
    }
    u32::try_from(size.div_ceil(chunk_size)).map_err(|_| {
        crate::Error::InvalidUpload(format!(
            "{size} bytes at {chunk_size} bytes per chunk exceeds the chunk limit"
        ))
    })
}
