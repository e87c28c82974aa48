//! Storage Manager
//!
//! Manages the set of sorted runs and coordinates reads/writes.
//!
//! ## Responsibilities
//! - Re-open the runs named by the meta record on startup
//! - Search runs newest → oldest for reads
//! - Write new runs and commit them to the meta record
//! - Replace a snapshot of runs with their compacted merge

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::entry::Entry;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::StrataError;

use super::manifest::{Manifest, MetaState};
use super::sstable::{self, RunSize, SSTable, SSTableBuilder, SSTableReader};

/// A run whose files are complete but which the meta record does not list yet
#[derive(Debug)]
pub struct PendingRun {
    table: SSTable,
}

impl PendingRun {
    pub fn table(&self) -> &SSTable {
        &self.table
    }
}

/// The input of one compaction: the runs live when it started
#[derive(Debug)]
pub struct CompactionPlan {
    /// Runs to replace, oldest → newest
    pub inputs: Vec<Arc<SSTableReader>>,
    /// Number reserved for the merged run
    pub output_id: u64,
    /// Whether tombstones can be dropped from the merged run
    pub drop_tombstones: bool,
}

impl CompactionPlan {
    pub fn input_ids(&self) -> Vec<u64> {
        self.inputs.iter().map(|r| r.id()).collect()
    }
}

/// Manages the storage layer
///
/// ## Concurrency:
/// - `runs`: RwLock (many concurrent readers, exclusive swap on commit)
/// - `manifest`: Mutex, held across a meta commit and the matching `runs`
///   update so flush and compaction commits never interleave
/// - All methods use `&self`
pub struct StorageManager {
    /// Directory where runs and the meta record are stored
    data_dir: PathBuf,

    /// Open run readers in meta record order, oldest → newest
    runs: RwLock<Vec<Arc<SSTableReader>>>,

    /// Meta record, the source of truth for `runs`
    manifest: Mutex<Manifest>,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Load the meta record (missing or garbled → zero runs)
    /// 3. Delete run files the record does not list
    /// 4. Map every listed run
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let (mut manifest, state) = Manifest::load(path)?;
        if state == MetaState::Garbled {
            // Leave the unreferenced files alone and number new runs past them
            if let Some(max) = Self::highest_run_id(path)? {
                manifest.skip_to(max + 1);
            }
        } else {
            Self::remove_orphans(path, manifest.runs())?;
        }

        let mut runs = Vec::with_capacity(manifest.run_count());
        for &id in manifest.runs() {
            runs.push(Arc::new(SSTableReader::open(path, id)?));
        }

        tracing::debug!(
            "Opened storage at {} with {} runs (meta {:?})",
            path.display(),
            runs.len(),
            state
        );

        Ok(Self {
            data_dir: path.to_path_buf(),
            runs: RwLock::new(runs),
            manifest: Mutex::new(manifest),
        })
    }

    /// Delete run files left behind by a flush or compaction that never
    /// reached its meta commit
    fn remove_orphans(dir: &Path, live: &[u64]) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let file_path = entry?.path();
            if !file_path.is_file() {
                continue;
            }
            if let Some(id) = sstable::parse_run_id(&file_path) {
                if !live.contains(&id) {
                    tracing::warn!("Removing orphaned run file {}", file_path.display());
                    fs::remove_file(&file_path)?;
                }
            }
        }
        Ok(())
    }

    fn highest_run_id(dir: &Path) -> Result<Option<u64>> {
        let mut highest = None;
        for entry in fs::read_dir(dir)? {
            if let Some(id) = sstable::parse_run_id(&entry?.path()) {
                highest = highest.max(Some(id));
            }
        }
        Ok(highest)
    }

    /// Get an entry by key (searches all runs newest → oldest)
    ///
    /// Returns the first definitive hit, tombstones included; the caller
    /// decides what a tombstone means.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let runs = self.runs.read();

        for reader in runs.iter().rev() {
            // Skip run if key is outside its range
            if !reader.might_contain(key) {
                continue;
            }
            if let Some(entry) = reader.get(key)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Shared handles on every live run, oldest → newest
    pub fn snapshot(&self) -> Vec<Arc<SSTableReader>> {
        self.runs.read().clone()
    }

    // =========================================================================
    // Flush Path
    // =========================================================================

    /// Write `entries` (ascending, exactly `size` bytes) as a new run.
    ///
    /// The run is invisible until [`increment_run_count`](Self::increment_run_count).
    pub fn write_run<I>(&self, entries: I, size: RunSize) -> Result<PendingRun>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let id = self.manifest.lock().allocate_id();
        let table = self.build_run(id, entries, size)?;
        Ok(PendingRun { table })
    }

    /// Commit a written run to the meta record and start serving it
    pub fn increment_run_count(&self, pending: PendingRun) -> Result<()> {
        let id = pending.table.id;
        let reader = Arc::new(SSTableReader::open(&self.data_dir, id)?);

        let mut manifest = self.manifest.lock();
        if let Err(e) = manifest.commit_append(id) {
            drop(manifest);
            drop(reader);
            self.remove_run_files(id);
            return Err(e);
        }

        self.runs.write().push(reader);
        Ok(())
    }

    /// Flush a MemTable to a new run: measure, write, commit
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        if memtable.is_empty() {
            return Err(StrataError::Storage("Cannot flush empty MemTable".to_string()));
        }

        let size = RunSize::measure(memtable.iter().map(Ok))?;
        let pending = self.write_run(memtable.iter().map(Ok), size)?;
        let table = pending.table.clone();
        self.increment_run_count(pending)?;

        tracing::info!(
            "Flushed {} entries ({} bytes) to run {}",
            table.entry_count,
            table.data_bytes,
            table.id
        );
        Ok(table)
    }

    // =========================================================================
    // Compaction Path
    // =========================================================================

    /// Snapshot the current runs for a full compaction and reserve the
    /// output number. Runs committed meanwhile stay newer than the merge.
    ///
    /// Returns `None` when there are fewer than two runs.
    pub fn plan_compaction(&self) -> Option<CompactionPlan> {
        let mut manifest = self.manifest.lock();
        let inputs = self.snapshot();
        if inputs.len() < 2 {
            return None;
        }

        // Tombstones only shadow older data; with the oldest run among the
        // inputs there is nothing older left for them to hide.
        let drop_tombstones = inputs.first().map(|r| r.id()) == manifest.runs().first().copied();

        Some(CompactionPlan {
            inputs,
            output_id: manifest.allocate_id(),
            drop_tombstones,
        })
    }

    /// Write the merged content of `plan.inputs` as one run, swap the meta
    /// record to it and delete the replaced files.
    ///
    /// An empty merge (everything was deleted) writes no run at all.
    pub fn compact<I>(&self, plan: CompactionPlan, entries: I, size: RunSize) -> Result<Option<SSTable>>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let input_ids = plan.input_ids();

        let (table, reader) = if size.is_empty() {
            (None, None)
        } else {
            let table = self.build_run(plan.output_id, entries, size)?;
            let reader = Arc::new(SSTableReader::open(&self.data_dir, table.id)?);
            (Some(table), Some(reader))
        };

        {
            let mut manifest = self.manifest.lock();
            if let Err(e) = manifest.commit_replace(&input_ids, table.as_ref().map(|t| t.id)) {
                drop(manifest);
                self.remove_run_files(plan.output_id);
                return Err(e);
            }

            // Follow the record's order so the output ranks where its newest
            // input did
            let mut runs = self.runs.write();
            let mut live: HashMap<u64, Arc<SSTableReader>> =
                runs.drain(..).chain(reader).map(|r| (r.id(), r)).collect();
            *runs = manifest.runs().iter().filter_map(|id| live.remove(id)).collect();
        }

        // In-flight iterators keep their mappings; the files can go now
        for id in &input_ids {
            self.remove_run_files(*id);
        }

        tracing::info!(
            "Compacted runs {:?} into {}",
            input_ids,
            table.as_ref().map_or_else(|| "nothing".to_string(), |t| format!("run {}", t.id))
        );
        Ok(table)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the number of live runs
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Live run numbers, oldest → newest
    pub fn run_ids(&self) -> Vec<u64> {
        self.runs.read().iter().map(|r| r.id()).collect()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next run number (for testing/debugging)
    pub fn next_run_id(&self) -> u64 {
        self.manifest.lock().next_run_id()
    }

    /// Release every mapped run
    pub fn close(&self) {
        let released = std::mem::take(&mut *self.runs.write());
        tracing::debug!("Released {} runs", released.len());
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn build_run<I>(&self, id: u64, entries: I, size: RunSize) -> Result<SSTable>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let result = SSTableBuilder::create(&self.data_dir, id, size).and_then(|mut builder| {
            for entry in entries {
                builder.add(&entry?)?;
            }
            builder.finish()
        });

        if result.is_err() {
            self.remove_run_files(id);
        }
        result
    }

    fn remove_run_files(&self, id: u64) {
        for path in [
            sstable::data_path(&self.data_dir, id),
            sstable::index_path(&self.data_dir, id),
        ] {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("Failed to remove run file {}: {}", path.display(), e);
                }
            }
        }
    }
}
