//! Tests for the k-way merge
//!
//! These tests verify:
//! - Ascending, duplicate-free output
//! - Newest source wins on equal keys
//! - Tombstone skipping
//! - Mixed memtable and run sources
//! - Error propagation

use std::sync::Arc;

use stratakv::memtable::MemTable;
use stratakv::merge::{self, EntrySource, MergeIterator};
use stratakv::storage::{RunSize, SSTableBuilder, SSTableReader};
use stratakv::{Entry, Result, StrataError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn source(entries: Vec<Entry>) -> EntrySource {
    Box::new(entries.into_iter().map(Ok))
}

fn put(key: &'static str, value: &'static str) -> Entry {
    Entry::new(key, value)
}

fn del(key: &'static str) -> Entry {
    Entry::tombstone(key)
}

fn collect(merge: MergeIterator) -> Vec<Entry> {
    merge.map(Result::unwrap).collect()
}

fn keys(entries: &[Entry]) -> Vec<&[u8]> {
    entries.iter().map(Entry::key).collect()
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_no_sources() {
    let merge = MergeIterator::new(Vec::new(), true).unwrap();
    assert_eq!(merge.count(), 0);
}

#[test]
fn test_single_source_passthrough() {
    let entries = vec![put("a", "1"), put("b", "2"), put("c", "3")];

    let merged = collect(MergeIterator::new(vec![source(entries.clone())], false).unwrap());

    assert_eq!(merged, entries);
}

#[test]
fn test_interleaved_sources_sorted() {
    let older = source(vec![put("a", "1"), put("d", "4"), put("f", "6")]);
    let newer = source(vec![put("b", "2"), put("c", "3"), put("e", "5")]);

    let merged = collect(MergeIterator::new(vec![older, newer], false).unwrap());

    assert_eq!(keys(&merged), vec![&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..], &b"e"[..], &b"f"[..]]);
}

#[test]
fn test_unsigned_byte_order() {
    let older = source(vec![Entry::new(vec![0x01u8], "low")]);
    let newer = source(vec![Entry::new(vec![0x80u8], "high")]);

    let merged = collect(MergeIterator::new(vec![older, newer], false).unwrap());

    assert_eq!(merged[0].key(), &[0x01u8][..]);
    assert_eq!(merged[1].key(), &[0x80u8][..]);
}

// =============================================================================
// Recency Tests
// =============================================================================

#[test]
fn test_newest_source_wins() {
    let oldest = source(vec![put("k", "v0"), put("x", "x0")]);
    let middle = source(vec![put("k", "v1")]);
    let newest = source(vec![put("k", "v2")]);

    let merged = collect(MergeIterator::new(vec![oldest, middle, newest], false).unwrap());

    assert_eq!(merged, vec![put("k", "v2"), put("x", "x0")]);
}

#[test]
fn test_shadowed_sources_keep_advancing() {
    let older = source(vec![put("a", "old"), put("b", "old"), put("c", "old")]);
    let newer = source(vec![put("a", "new"), put("c", "new")]);

    let merged = collect(MergeIterator::new(vec![older, newer], false).unwrap());

    assert_eq!(merged, vec![put("a", "new"), put("b", "old"), put("c", "new")]);
}

// =============================================================================
// Tombstone Tests
// =============================================================================

#[test]
fn test_tombstone_hides_older_value() {
    let older = source(vec![put("a", "1"), put("b", "2")]);
    let newer = source(vec![del("a")]);

    let merged = collect(MergeIterator::new(vec![older, newer], true).unwrap());

    assert_eq!(merged, vec![put("b", "2")]);
}

#[test]
fn test_tombstones_kept_when_not_skipping() {
    let older = source(vec![put("a", "1")]);
    let newer = source(vec![del("a")]);

    let merged = collect(MergeIterator::new(vec![older, newer], false).unwrap());

    assert_eq!(merged, vec![del("a")]);
}

#[test]
fn test_value_after_tombstone_is_visible() {
    let oldest = source(vec![put("a", "1")]);
    let middle = source(vec![del("a")]);
    let newest = source(vec![put("a", "3")]);

    let merged = collect(MergeIterator::new(vec![oldest, middle, newest], true).unwrap());

    assert_eq!(merged, vec![put("a", "3")]);
}

#[test]
fn test_all_deleted_yields_nothing() {
    let older = source(vec![put("a", "1"), put("b", "2")]);
    let newer = source(vec![del("a"), del("b")]);

    let merge = MergeIterator::new(vec![older, newer], true).unwrap();

    assert_eq!(merge.count(), 0);
}

// =============================================================================
// Mixed Source Tests
// =============================================================================

#[test]
fn test_run_and_memtable_sources() {
    let temp = TempDir::new().unwrap();
    let on_disk = vec![put("a", "disk"), put("b", "disk"), put("c", "disk")];
    let size = RunSize::measure(on_disk.iter().cloned().map(Ok)).unwrap();
    let mut builder = SSTableBuilder::create(temp.path(), 0, size).unwrap();
    for entry in &on_disk {
        builder.add(entry).unwrap();
    }
    builder.finish().unwrap();
    let run = Arc::new(SSTableReader::open(temp.path(), 0).unwrap());

    let memtable = Arc::new(MemTable::new());
    memtable.put("b", "mem");
    memtable.delete("c");
    memtable.put("d", "mem");

    let sources = vec![
        merge::run_source(&run, Some(&b"a"[..]), Some(&b"d"[..])).unwrap(),
        merge::memtable_source(&memtable, Some(&b"a"[..]), Some(&b"d"[..])),
    ];
    let merged = collect(MergeIterator::new(sources, true).unwrap());

    // d is outside [a, d); c is deleted
    assert_eq!(merged, vec![put("a", "disk"), put("b", "mem")]);
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_source_error_ends_iteration() {
    let failing: EntrySource = Box::new(
        vec![
            Ok(put("a", "1")),
            Err(StrataError::Corruption("bad entry".to_string())),
            Ok(put("c", "3")),
        ]
        .into_iter(),
    );
    let other = source(vec![put("b", "2"), put("d", "4")]);

    let mut merge = MergeIterator::new(vec![failing, other], false).unwrap();

    assert_eq!(merge.next().unwrap().unwrap(), put("a", "1"));
    assert!(matches!(merge.next(), Some(Err(StrataError::Corruption(_)))));
    assert!(merge.next().is_none());
}

#[test]
fn test_error_in_first_head_fails_construction() {
    let failing: EntrySource = Box::new(
        vec![Err(StrataError::Corruption("bad entry".to_string()))].into_iter(),
    );

    assert!(MergeIterator::new(vec![failing], false).is_err());
}
