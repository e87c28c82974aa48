//! Merge Iterator
//!
//! K-way merge of individually sorted entry sources into one ascending,
//! duplicate-free stream.
//!
//! Sources are ranked by recency: the source list is ordered oldest →
//! newest and a source's position is its rank. When several sources hold
//! the same key, the entry from the highest rank is emitted and the others
//! are skipped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::comparator;
use crate::entry::Entry;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::storage::SSTableReader;
use crate::StrataError;

/// An ordered entry producer: strictly ascending keys
pub type EntrySource = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// `[from, to)` slice of a memtable as a merge source
pub fn memtable_source(table: &Arc<MemTable>, from: Option<&[u8]>, to: Option<&[u8]>) -> EntrySource {
    Box::new(table.range(from, to).map(Ok))
}

/// `[from, to)` slice of a sorted run as a merge source
pub fn run_source(run: &Arc<SSTableReader>, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<EntrySource> {
    Ok(Box::new(run.range(from, to)?))
}

/// Current head of one source
struct HeapEntry {
    entry: Entry,
    rank: usize,
    source: EntrySource,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// `BinaryHeap` pops the greatest element: the smallest key, and on a
    /// tie the newest source.
    fn cmp(&self, other: &Self) -> Ordering {
        comparator::compare(other.entry.key(), self.entry.key()).then(self.rank.cmp(&other.rank))
    }
}

/// Lazy ascending merge over several sources
///
/// Forward-only and not restartable. A source error is yielded once, after
/// the entry that was being produced when it occurred, and ends the
/// iteration.
pub struct MergeIterator {
    heap: BinaryHeap<HeapEntry>,
    skip_tombstones: bool,
    pending_error: Option<StrataError>,
    failed: bool,
}

impl MergeIterator {
    /// Merge `sources`, given oldest → newest
    ///
    /// With `skip_tombstones` deleted keys are left out of the output;
    /// otherwise tombstones are emitted like any other entry.
    pub fn new(sources: Vec<EntrySource>, skip_tombstones: bool) -> Result<Self> {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            skip_tombstones,
            pending_error: None,
            failed: false,
        };
        for (rank, source) in sources.into_iter().enumerate() {
            merge.refill(rank, source)?;
        }
        Ok(merge)
    }

    /// Pull the next head of `source` into the heap
    fn refill(&mut self, rank: usize, mut source: EntrySource) -> Result<()> {
        if let Some(entry) = source.next().transpose()? {
            self.heap.push(HeapEntry { entry, rank, source });
        }
        Ok(())
    }

    /// Advance a source, keeping the first error for the next call
    fn advance(&mut self, rank: usize, source: EntrySource) {
        if let Err(e) = self.refill(rank, source) {
            self.pending_error.get_or_insert(e);
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.pending_error.take() {
                self.failed = true;
                self.heap.clear();
                return Some(Err(e));
            }
            if self.failed {
                return None;
            }

            let HeapEntry { entry, rank, source } = self.heap.pop()?;

            // Older heads with the same key are shadowed
            while self
                .heap
                .peek()
                .map_or(false, |head| head.entry.key == entry.key)
            {
                if let Some(shadowed) = self.heap.pop() {
                    self.advance(shadowed.rank, shadowed.source);
                }
            }
            self.advance(rank, source);

            if self.skip_tombstones && entry.is_tombstone() {
                continue;
            }
            return Some(Ok(entry));
        }
    }
}
