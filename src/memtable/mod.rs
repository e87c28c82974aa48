//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory, concurrently from many threads
//! - Track accumulated size for flush triggers
//! - Ordered iteration for sorted run creation and range scans
//!
//! ## Data Structure Choice
//! A `crossbeam_skiplist::SkipMap`:
//! - Ordered keys (required for sorted run generation)
//! - Lock-free reads and inserts, no global mutex around the map
//! - Readers never block on writers
//!
//! Tombstones are stored as ordinary entries so that deletions shadow
//! older on-disk values until compaction removes them.

mod table;

pub use table::{MemTable, MemTableIterator};
