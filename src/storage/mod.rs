//! Storage Module
//!
//! Persistent storage layer of immutable, memory-mapped sorted runs.
//!
//! ## Responsibilities
//! - Persist memtables to disk as sorted runs
//! - Point lookups by binary search over each run's index
//! - Compaction of all runs into one
//! - Crash consistency through the meta record
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   meta                   live run numbers (commit point)
//!   sstable_000000.data    run 0 entries
//!   sstable_000000.index   run 0 offsets
//!   sstable_000001.data
//!   sstable_000001.index
//!   ...
//! ```
//! Recency follows the meta record's run list (commit order), not the
//! number: a flush numbered before a compaction was planned can commit
//! after it.

mod manager;
pub mod manifest;
pub mod sstable;

pub use manager::{CompactionPlan, PendingRun, StorageManager};
pub use manifest::{Manifest, MetaRecord, MetaState};
pub use sstable::{RunSize, SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
