//! SSTable Module
//!
//! Sorted run - an immutable pair of on-disk files holding sorted entries.
//!
//! ## File Format
//! ```text
//! sstable_{id:06}.data
//! ┌─────────────────────────────────────────────────────────┐
//! │ [KeyLen: i64][Key][ValLen: i64][Value]                  │
//! │ ... repeated for each entry, ascending key order ...    │
//! │ (ValLen = -1 means tombstone, no value bytes)           │
//! └─────────────────────────────────────────────────────────┘
//!
//! sstable_{id:06}.index
//! ┌─────────────────────────────────────────────────────────┐
//! │ [Sequence: u64][DataOffset: u64]                        │
//! │ ... one fixed-size record per entry, same order ...     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Both files are sized exactly up front,
//! written once through a writable memory map, and afterwards only ever
//! mapped read-only.

mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

use crate::entry::{Entry, LEN_PREFIX_SIZE};
use crate::error::Result;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Index record size: Sequence (8) + DataOffset (8) = 16 bytes
pub(crate) const INDEX_RECORD_SIZE: usize = 16;

/// Value length marking a tombstone (deleted key)
pub(crate) const TOMBSTONE_LEN: i64 = -1;

const FILE_PREFIX: &str = "sstable_";
const DATA_EXTENSION: &str = "data";
const INDEX_EXTENSION: &str = "index";

/// Path of the data segment for run `id`
pub fn data_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{:06}.{}", FILE_PREFIX, id, DATA_EXTENSION))
}

/// Path of the index segment for run `id`
pub fn index_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{:06}.{}", FILE_PREFIX, id, INDEX_EXTENSION))
}

/// Parse a run id from either of its file names
/// "sstable_000042.data" → Some(42)
pub fn parse_run_id(path: &Path) -> Option<u64> {
    let ext = path.extension()?.to_str()?;
    if ext != DATA_EXTENSION && ext != INDEX_EXTENSION {
        return None;
    }
    let name = path.file_stem()?.to_str()?;
    name.strip_prefix(FILE_PREFIX)?.parse().ok()
}

// =============================================================================
// Run Sizing
// =============================================================================

/// Exact byte sizes of a run, computed in a pass before it is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSize {
    pub data_bytes: u64,
    pub index_bytes: u64,
    pub entry_count: u64,
}

impl RunSize {
    /// Account for one more entry
    pub fn add(&mut self, entry: &Entry) {
        self.data_bytes += entry.encoded_size() as u64;
        self.index_bytes += INDEX_RECORD_SIZE as u64;
        self.entry_count += 1;
    }

    /// First pass over an entry source
    pub fn measure<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let mut size = Self::default();
        for entry in entries {
            size.add(&entry?);
        }
        Ok(size)
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Metadata of a freshly written run, returned by the builder
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Run number, also its recency rank
    pub id: u64,
    /// Number of entries, tombstones included
    pub entry_count: u64,
    /// Data segment size in bytes
    pub data_bytes: u64,
    /// Index segment size in bytes
    pub index_bytes: u64,
    /// Smallest key
    pub min_key: Vec<u8>,
    /// Largest key
    pub max_key: Vec<u8>,
}

impl SSTable {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Quick check if a key might be in this run (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }
}

/// Read a little-endian u64 at `offset`, `None` past the end of `buf`
pub(crate) fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let end = offset.checked_add(8)?;
    let bytes: [u8; 8] = buf.get(offset..end)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Read a little-endian i64 length prefix at `offset`
pub(crate) fn read_len(buf: &[u8], offset: usize) -> Option<i64> {
    let end = offset.checked_add(LEN_PREFIX_SIZE)?;
    let bytes: [u8; 8] = buf.get(offset..end)?.try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}
