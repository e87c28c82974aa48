//! SSTable Reader
//!
//! Maps a run's files read-only and answers lookups by binary search over
//! the index records, resolving each probe's key straight from the mapped
//! data segment.

use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;

use crate::comparator;
use crate::entry::{Entry, LEN_PREFIX_SIZE};
use crate::error::Result;
use crate::StrataError;

use super::iterator::SSTableIterator;
use super::{data_path, index_path, read_len, read_u64, INDEX_RECORD_SIZE, TOMBSTONE_LEN};

/// Read-only handle on one sorted run
pub struct SSTableReader {
    id: u64,
    data: Mmap,
    index: Mmap,
    entry_count: u64,
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("id", &self.id)
            .field("entry_count", &self.entry_count)
            .field("data_bytes", &self.data.len())
            .finish()
    }
}

impl SSTableReader {
    /// Open run `id` in `dir`
    ///
    /// The file descriptors are closed right away; the mappings stay valid
    /// until the reader is dropped.
    pub fn open(dir: &Path, id: u64) -> Result<Self> {
        let data_file = File::open(data_path(dir, id))?;
        let index_file = File::open(index_path(dir, id))?;

        let index_len = index_file.metadata()?.len();
        if index_len == 0 || index_len % INDEX_RECORD_SIZE as u64 != 0 {
            return Err(StrataError::Corruption(format!(
                "Run {} index size {} is not a positive multiple of {}",
                id, index_len, INDEX_RECORD_SIZE
            )));
        }
        if data_file.metadata()?.len() == 0 {
            return Err(StrataError::Corruption(format!("Run {} data segment is empty", id)));
        }

        // SAFETY: runs are immutable once the manifest lists them; the only
        // writer finished and unmapped the files before they became visible.
        let data = unsafe { Mmap::map(&data_file)? };
        let index = unsafe { Mmap::map(&index_file)? };

        Ok(Self {
            id,
            entry_count: index_len / INDEX_RECORD_SIZE as u64,
            data,
            index,
        })
    }

    /// Run number
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Data segment size in bytes
    pub fn data_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    // =========================================================================
    // Position Resolution
    // =========================================================================

    fn corrupt(&self, what: &str, pos: u64) -> StrataError {
        StrataError::Corruption(format!("run {} entry {}: {}", self.id, pos, what))
    }

    /// Data segment offset of the entry at `pos`
    fn data_offset(&self, pos: u64) -> Result<usize> {
        let record = pos as usize * INDEX_RECORD_SIZE;
        read_u64(&self.index, record + 8)
            .map(|offset| offset as usize)
            .ok_or_else(|| self.corrupt("index record out of bounds", pos))
    }

    /// (start, len) of the key bytes at `pos`, not yet bounds-checked
    fn key_span(&self, pos: u64) -> Result<(usize, usize)> {
        let offset = self.data_offset(pos)?;
        let key_len = read_len(&self.data, offset)
            .filter(|len| *len >= 0)
            .ok_or_else(|| self.corrupt("bad key length", pos))?;
        Ok((offset + LEN_PREFIX_SIZE, key_len as usize))
    }

    /// Compare `key` against the key stored at `pos`
    fn compare_at(&self, key: &[u8], pos: u64) -> Result<Ordering> {
        let (start, len) = self.key_span(pos)?;
        comparator::compare_in_region(key, &self.data, start, len)
            .ok_or_else(|| self.corrupt("key runs past end of data", pos))
    }

    /// `len` bytes of the data segment at `start`
    fn slice(&self, start: usize, len: usize, pos: u64, what: &str) -> Result<&[u8]> {
        start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| self.corrupt(what, pos))
    }

    /// Key bytes at `pos`, borrowed from the mapping
    pub fn key_at(&self, pos: u64) -> Result<&[u8]> {
        let (start, len) = self.key_span(pos)?;
        self.slice(start, len, pos, "key runs past end of data")
    }

    /// Decode the full entry at `pos`
    pub fn entry_at(&self, pos: u64) -> Result<Entry> {
        let (start, len) = self.key_span(pos)?;
        let key = self.slice(start, len, pos, "key runs past end of data")?;
        let value_offset = start + len;

        let value_len = read_len(&self.data, value_offset)
            .ok_or_else(|| self.corrupt("missing value length", pos))?;
        let value = match value_len {
            TOMBSTONE_LEN => None,
            len if len >= 0 => {
                let begin = value_offset + LEN_PREFIX_SIZE;
                let bytes = self.slice(begin, len as usize, pos, "value runs past end of data")?;
                Some(Bytes::copy_from_slice(bytes))
            }
            _ => return Err(self.corrupt("bad value length", pos)),
        };

        Ok(Entry {
            key: Bytes::copy_from_slice(key),
            value,
        })
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Smallest position whose key is >= `key`, or `entry_count` if none is
    ///
    /// Binary search with `lo` starting as a sentinel below every key and
    /// `hi` at the last position; the gap narrows until `hi - lo == 1`.
    pub fn lower_bound(&self, key: &[u8]) -> Result<u64> {
        let mut lo: i64 = -1;
        let mut hi: i64 = self.entry_count as i64 - 1;

        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.compare_at(key, mid as u64)? == Ordering::Greater {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        // `hi` only stays on the last position without checking it
        if self.compare_at(key, hi as u64)? == Ordering::Greater {
            return Ok(self.entry_count);
        }
        Ok(hi as u64)
    }

    /// Point lookup
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: key present; the entry may be a tombstone
    /// - `Ok(None)`: key not in this run
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let pos = self.lower_bound(key)?;
        if pos == self.entry_count || self.compare_at(key, pos)? != Ordering::Equal {
            return Ok(None);
        }
        self.entry_at(pos).map(Some)
    }

    /// Get the minimum key in this run
    pub fn first_key(&self) -> Result<&[u8]> {
        self.key_at(0)
    }

    /// Get the maximum key in this run
    pub fn last_key(&self) -> Result<&[u8]> {
        self.key_at(self.entry_count - 1)
    }

    /// Quick check if a key might be in this run (range check)
    ///
    /// Unreadable bounds answer `true` so the lookup itself reports the error.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.first_key(), self.last_key()) {
            (Ok(min), Ok(max)) => key >= min && key <= max,
            _ => true,
        }
    }

    /// Owned iterator over entries with keys in `[from, to)`
    pub fn range(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<SSTableIterator> {
        let start = match from {
            Some(key) => self.lower_bound(key)?,
            None => 0,
        };
        let end = match to {
            Some(key) => self.lower_bound(key)?,
            None => self.entry_count,
        };
        Ok(SSTableIterator::new(Arc::clone(self), start, end.max(start)))
    }
}
