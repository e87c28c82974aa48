//! SSTable Iterator
//!
//! Sequential iteration over a position range of a run.

use std::sync::Arc;

use crate::entry::Entry;
use crate::error::Result;

use super::SSTableReader;

/// Iterator over run entries in sorted key order
///
/// Owns an `Arc` on the reader, so the mapping outlives the iterator even
/// if compaction retires the run meanwhile.
pub struct SSTableIterator {
    reader: Arc<SSTableReader>,
    /// Next position to decode
    pos: u64,
    /// Stop before this position
    end: u64,
}

impl SSTableIterator {
    pub(super) fn new(reader: Arc<SSTableReader>, start: u64, end: u64) -> Self {
        Self {
            reader,
            pos: start,
            end,
        }
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }

        let item = self.reader.entry_at(self.pos);
        self.pos = if item.is_ok() { self.pos + 1 } else { self.end };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.end - self.pos) as usize;
        // a corrupt entry ends iteration early
        (0, Some(left))
    }
}
