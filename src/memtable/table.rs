//! MemTable implementation
//!
//! SkipMap-based memtable with an atomic size counter.

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::comparator;
use crate::entry::Entry;

/// In-memory sorted table for recent writes
///
/// ## Size accounting
/// `size` grows by the key+value length of every upsert and is never
/// decreased, so overwriting a key counts both versions. The over-count is
/// accepted; it only makes the flush threshold fire a little early.
#[derive(Debug, Default)]
pub struct MemTable {
    data: SkipMap<Bytes, Entry>,
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the accumulated size afterwards
    pub fn upsert(&self, entry: Entry) -> usize {
        let added = entry.payload_size();
        self.data.insert(entry.key.clone(), entry);
        self.size.fetch_add(added, Ordering::SeqCst) + added
    }

    /// Put a key-value pair
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> usize {
        self.upsert(Entry::new(key, value))
    }

    /// Delete a key (inserts a tombstone)
    pub fn delete(&self, key: impl Into<Bytes>) -> usize {
        self.upsert(Entry::tombstone(key))
    }

    /// Insert `entry` only if its key is not present yet.
    ///
    /// Check and insert are two steps; callers must exclude other writers.
    pub(crate) fn insert_if_absent(&self, entry: Entry) -> bool {
        if self.data.contains_key(entry.key()) {
            return false;
        }
        self.upsert(entry);
        true
    }

    /// Look up a key. A tombstone is returned as an entry with no value.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.data.get(key).map(|e| e.value().clone())
    }

    /// Accumulated key+value bytes since creation
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Number of distinct keys, tombstones included
    pub fn entry_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All entries in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        self.data.iter().map(|e| e.value().clone())
    }

    /// Owned iterator over `[from, to)`; `None` leaves that side open
    pub fn range(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>) -> MemTableIterator {
        MemTableIterator::new(Arc::clone(self), from, to)
    }
}

/// Forward iterator over a shared MemTable slice
///
/// Holds the table by `Arc` and re-seeks the skip list after the last
/// returned key on every step, so it borrows nothing and stays valid while
/// other threads keep writing.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    lower: Bound<Bytes>,
    upper: Option<Bytes>,
    exhausted: bool,
}

impl MemTableIterator {
    fn new(table: Arc<MemTable>, from: Option<&[u8]>, to: Option<&[u8]>) -> Self {
        let exhausted = matches!(
            (from, to),
            (Some(f), Some(t)) if comparator::compare(f, t) != std::cmp::Ordering::Less
        );
        Self {
            table,
            lower: match from {
                Some(key) => Bound::Included(Bytes::copy_from_slice(key)),
                None => Bound::Unbounded,
            },
            upper: to.map(Bytes::copy_from_slice),
            exhausted,
        }
    }
}

impl Iterator for MemTableIterator {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let lower: Bound<&[u8]> = match &self.lower {
            Bound::Included(key) => Bound::Included(key.as_ref()),
            Bound::Excluded(key) => Bound::Excluded(key.as_ref()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let upper: Bound<&[u8]> = match &self.upper {
            Some(key) => Bound::Excluded(key.as_ref()),
            None => Bound::Unbounded,
        };

        let next = self
            .table
            .data
            .range::<[u8], _>((lower, upper))
            .next()
            .map(|e| e.value().clone());

        match next {
            Some(entry) => {
                self.lower = Bound::Excluded(entry.key.clone());
                Some(entry)
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}
