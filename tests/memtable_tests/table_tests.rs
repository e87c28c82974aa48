//! MemTable Tests
//!
//! Tests verify:
//! - Basic upsert/get operations
//! - Size accounting
//! - Tombstone handling
//! - Sorted iteration and half-open ranges
//! - Concurrent access patterns

use std::sync::Arc;
use std::thread;

use stratakv::memtable::MemTable;
use stratakv::Entry;

fn keys_of(entries: impl Iterator<Item = Entry>) -> Vec<Vec<u8>> {
    entries.map(|e| e.key().to_vec()).collect()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let memtable = MemTable::new();
    assert_eq!(memtable.entry_count(), 0);
    assert_eq!(memtable.size(), 0);
    assert!(memtable.is_empty());
}

#[test]
fn test_put_and_get() {
    let memtable = MemTable::new();

    memtable.put("key1", "value1");

    let entry = memtable.get(b"key1").unwrap();
    assert_eq!(entry.value(), Some(&b"value1"[..]));
}

#[test]
fn test_get_nonexistent_key() {
    let memtable = MemTable::new();
    assert_eq!(memtable.get(b"nonexistent"), None);
}

#[test]
fn test_upsert_replaces_existing() {
    let memtable = MemTable::new();

    memtable.put("key1", "value1");
    memtable.put("key1", "value2");

    assert_eq!(memtable.entry_count(), 1);
    assert_eq!(memtable.get(b"key1").unwrap().value(), Some(&b"value2"[..]));
}

#[test]
fn test_delete_creates_tombstone() {
    let memtable = MemTable::new();

    memtable.put("key1", "value1");
    memtable.delete("key1");

    let entry = memtable.get(b"key1").unwrap();
    assert!(entry.is_tombstone());
    assert_eq!(memtable.entry_count(), 1);
}

#[test]
fn test_delete_nonexistent_key() {
    let memtable = MemTable::new();

    memtable.delete("ghost");

    assert!(memtable.get(b"ghost").unwrap().is_tombstone());
}

#[test]
fn test_empty_value_is_not_a_tombstone() {
    let memtable = MemTable::new();

    memtable.put("key", "");

    let entry = memtable.get(b"key").unwrap();
    assert!(!entry.is_tombstone());
    assert_eq!(entry.value(), Some(&b""[..]));
}

// =============================================================================
// Size Accounting Tests
// =============================================================================

#[test]
fn test_upsert_returns_accumulated_size() {
    let memtable = MemTable::new();

    assert_eq!(memtable.put("key1", "value1"), 10);
    assert_eq!(memtable.put("k2", "v2"), 14);
    assert_eq!(memtable.size(), 14);
}

#[test]
fn test_overwrite_counts_both_versions() {
    let memtable = MemTable::new();

    memtable.put("key1", "value1");
    memtable.put("key1", "v");

    // Never decreases
    assert_eq!(memtable.size(), 10 + 5);
}

#[test]
fn test_tombstone_counts_key_only() {
    let memtable = MemTable::new();

    memtable.delete("key1");

    assert_eq!(memtable.size(), 4);
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_iter_sorted_order() {
    let memtable = MemTable::new();
    memtable.put("c", "3");
    memtable.put("a", "1");
    memtable.put("b", "2");

    assert_eq!(
        keys_of(memtable.iter()),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
}

#[test]
fn test_iter_orders_bytes_unsigned() {
    let memtable = MemTable::new();
    memtable.put(vec![0xFFu8], "high");
    memtable.put(vec![0x01u8], "low");
    memtable.put(vec![0x01u8, 0x00], "longer");

    assert_eq!(
        keys_of(memtable.iter()),
        vec![vec![0x01u8], vec![0x01u8, 0x00], vec![0xFFu8]]
    );
}

#[test]
fn test_iter_includes_tombstones() {
    let memtable = MemTable::new();
    memtable.put("a", "1");
    memtable.delete("b");

    let entries: Vec<Entry> = memtable.iter().collect();
    assert_eq!(entries.len(), 2);
    assert!(entries[1].is_tombstone());
}

#[test]
fn test_range_is_half_open() {
    let memtable = Arc::new(MemTable::new());
    for key in ["a", "b", "c", "d"] {
        memtable.put(key, "v");
    }

    let keys = keys_of(memtable.range(Some(&b"b"[..]), Some(&b"d"[..])));
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_range_open_bounds() {
    let memtable = Arc::new(MemTable::new());
    for key in ["a", "b", "c"] {
        memtable.put(key, "v");
    }

    assert_eq!(memtable.range(None, None).count(), 3);
    assert_eq!(keys_of(memtable.range(Some(&b"b"[..]), None)), vec![b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(keys_of(memtable.range(None, Some(&b"b"[..]))), vec![b"a".to_vec()]);
}

#[test]
fn test_range_empty_when_from_not_below_to() {
    let memtable = Arc::new(MemTable::new());
    memtable.put("a", "v");
    memtable.put("b", "v");

    assert_eq!(memtable.range(Some(&b"b"[..]), Some(&b"b"[..])).count(), 0);
    assert_eq!(memtable.range(Some(&b"b"[..]), Some(&b"a"[..])).count(), 0);
}

#[test]
fn test_range_sees_writes_behind_cursor_position() {
    let memtable = Arc::new(MemTable::new());
    memtable.put("a", "v");
    memtable.put("c", "v");

    let mut iter = memtable.range(None, None);
    assert_eq!(iter.next().unwrap().key(), b"a");

    // Inserted after the cursor; the iterator re-seeks and finds it
    memtable.put("b", "v");
    assert_eq!(iter.next().unwrap().key(), b"b");
    assert_eq!(iter.next().unwrap().key(), b"c");
    assert!(iter.next().is_none());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writes() {
    let memtable = Arc::new(MemTable::new());
    let mut handles = vec![];

    for t in 0..8 {
        let memtable = Arc::clone(&memtable);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                memtable.put(format!("t{}-k{:03}", t, i), "v");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(memtable.entry_count(), 800);
    // "tX-kNNN" is 7 bytes plus a 1 byte value
    assert_eq!(memtable.size(), 800 * 8);
}

#[test]
fn test_concurrent_reads_during_writes() {
    let memtable = Arc::new(MemTable::new());
    for i in 0..100 {
        memtable.put(format!("key{:03}", i), "v");
    }

    let writer = {
        let memtable = Arc::clone(&memtable);
        thread::spawn(move || {
            for i in 100..200 {
                memtable.put(format!("key{:03}", i), "v");
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let memtable = Arc::clone(&memtable);
            thread::spawn(move || {
                for i in 0..100 {
                    assert!(memtable.get(format!("key{:03}", i).as_bytes()).is_some());
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(memtable.entry_count(), 200);
}
