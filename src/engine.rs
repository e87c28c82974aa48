//! Engine Module
//!
//! The storage engine facade that coordinates all components.
//!
//! ## Responsibilities
//! - Accept concurrent upserts into the active memtable
//! - Swap a full memtable out and persist it in the background
//! - Apply backpressure when writes outrun the flush
//! - Answer point and range reads across memory and disk
//! - Schedule compaction of all runs into one

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::entry::Entry;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::merge::{self, MergeIterator};
use crate::scheduler::{FlushGate, FlushPermit, TaskHandle, Worker};
use crate::storage::{CompactionPlan, RunSize, StorageManager};
use crate::StrataError;

/// The active memtable and, while a flush runs, its read-only predecessor
#[derive(Clone)]
struct MemTables {
    active: Arc<MemTable>,
    flushing: Option<Arc<MemTable>>,
}

/// State shared with the background workers
struct EngineInner {
    config: Config,

    /// Upserts hold the read lock while writing into `active`; swapping
    /// `active` out takes the write lock
    memtables: RwLock<MemTables>,

    storage: StorageManager,

    /// At most one flush in flight; the permit travels with the flush job
    flush_gate: Arc<FlushGate>,

    /// Last failure of a flush nobody waited for
    background_error: Mutex<Option<StrataError>>,
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (`upsert`): concurrent; the skip list is thread-safe and
///   the size counter atomic. A shared lock only excludes the memtable swap.
/// - **Reads** (`get`, `range`): never block on writers; they clone the
///   memtable handles and the run list, then read without locks.
/// - **Flush**: one dedicated worker thread, admitted by [`FlushGate`].
/// - **Compaction**: another dedicated worker thread.
pub struct Engine {
    inner: Arc<EngineInner>,
    flush_worker: Worker,
    compaction_worker: Worker,
    closed: AtomicBool,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config and create the data directory
    /// 2. Open storage (meta record, orphan cleanup, run mapping)
    /// 3. Start the flush and compaction workers
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let storage = StorageManager::open(&config.data_dir)?;
        tracing::info!(
            "Opened engine at {} with {} runs, flush threshold {} bytes",
            config.data_dir.display(),
            storage.run_count(),
            config.flush_threshold
        );

        let inner = EngineInner {
            config,
            memtables: RwLock::new(MemTables {
                active: Arc::new(MemTable::new()),
                flushing: None,
            }),
            storage,
            flush_gate: FlushGate::new(),
            background_error: Mutex::new(None),
        };

        Ok(Self {
            inner: Arc::new(inner),
            flush_worker: Worker::spawn("stratakv-flush")?,
            compaction_worker: Worker::spawn("stratakv-compaction")?,
            closed: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get the live entry for a key
    ///
    /// Search order:
    /// 1. Active memtable
    /// 2. Flushing memtable
    /// 3. Runs (newest to oldest)
    ///
    /// The first hit decides; a tombstone means absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.ensure_open()?;

        // Memtables before runs: a flush commits its run before it clears
        // the flushing slot, so this order cannot miss an entry
        let tables = self.inner.memtables.read().clone();

        let hit = match tables.active.get(key) {
            Some(entry) => Some(entry),
            None => match tables.flushing.as_ref().and_then(|t| t.get(key)) {
                Some(entry) => Some(entry),
                None => self.inner.storage.get(key)?,
            },
        };

        Ok(hit.filter(|entry| !entry.is_tombstone()))
    }

    /// Ascending iterator over live entries with keys in `[from, to)`
    ///
    /// `None` leaves that side of the range open.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<MergeIterator> {
        self.ensure_open()?;

        let tables = self.inner.memtables.read().clone();
        let runs = self.inner.storage.snapshot();

        // Oldest → newest: runs, flushing snapshot, active table
        let mut sources = Vec::with_capacity(runs.len() + 2);
        for run in &runs {
            sources.push(merge::run_source(run, from, to)?);
        }
        if let Some(flushing) = &tables.flushing {
            sources.push(merge::memtable_source(flushing, from, to));
        }
        sources.push(merge::memtable_source(&tables.active, from, to));

        MergeIterator::new(sources, true)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace an entry; a tombstone entry deletes the key
    ///
    /// Fails with [`StrataError::NoCapacity`] without applying the write when
    /// the active memtable is over the flush threshold while a flush is
    /// still running.
    pub fn upsert(&self, entry: Entry) -> Result<()> {
        self.ensure_open()?;
        let threshold = self.inner.config.flush_threshold;

        if self.inner.active_size() > threshold && !self.relieve_pressure()? {
            tracing::debug!("Rejecting write, memtable over threshold and flush in flight");
            return Err(StrataError::NoCapacity);
        }

        let size = {
            let tables = self.inner.memtables.read();
            tables.active.upsert(entry)
        };

        if size > threshold {
            // Best effort: with the gate taken, the next upsert pushes back
            if let Err(e) = self.relieve_pressure() {
                tracing::warn!("Could not schedule flush: {}", e);
            }
        }
        Ok(())
    }

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.upsert(Entry::new(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
        ))
    }

    /// Delete a key (writes a tombstone)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.upsert(Entry::tombstone(Bytes::copy_from_slice(key)))
    }

    /// Try to start a size-triggered flush.
    ///
    /// Returns whether the active memtable is back under the threshold or
    /// on its way out.
    fn relieve_pressure(&self) -> Result<bool> {
        match self.inner.flush_gate.try_acquire() {
            Some(permit) => {
                self.start_flush(permit, false)?;
                Ok(true)
            }
            // Another writer may have swapped the table in the meantime
            None => Ok(self.inner.active_size() <= self.inner.config.flush_threshold),
        }
    }

    /// Swap the active memtable out and hand it to the flush worker.
    ///
    /// Unless `force`d, only a table that is still over the threshold is
    /// swapped. Returns `None` when there was nothing to flush; the permit
    /// is then released right away.
    fn start_flush(&self, permit: FlushPermit, force: bool) -> Result<Option<TaskHandle>> {
        let table = {
            let mut tables = self.inner.memtables.write();
            let over = tables.active.size() > self.inner.config.flush_threshold;
            if tables.active.is_empty() || !(force || over) {
                return Ok(None);
            }
            if tables.flushing.is_some() {
                return Err(StrataError::Storage(
                    "Previous flush snapshot is still pending".to_string(),
                ));
            }

            let table = std::mem::replace(&mut tables.active, Arc::new(MemTable::new()));
            tables.flushing = Some(Arc::clone(&table));
            table
        };

        tracing::debug!(
            "Flushing memtable with {} entries ({} bytes)",
            table.entry_count(),
            table.size()
        );

        let inner = Arc::clone(&self.inner);
        self.flush_worker
            .submit(move || inner.persist_flushing(table, permit))
            .map(Some)
    }

    /// Flush the active memtable to disk (public API)
    ///
    /// Blocks until a running flush finishes, then until the current active
    /// table is durable in a new run.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;

        let permit = self.inner.flush_gate.acquire()?;
        match self.start_flush(permit, true)? {
            Some(handle) => handle.wait(),
            None => Ok(()),
        }
    }

    /// Schedule compaction of every current run into one
    ///
    /// Runs flushed while the compaction works are left for the next one.
    /// Wait on the handle to observe the outcome, or drop it.
    pub fn compact(&self) -> Result<TaskHandle> {
        self.ensure_open()?;

        let inner = Arc::clone(&self.inner);
        self.compaction_worker.submit(move || inner.run_compaction())
    }

    /// Close the engine gracefully
    ///
    /// Stops the workers after their queued jobs, flushes whatever is left
    /// in memory and releases every run. Writers must be stopped first;
    /// a second call is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.flush_gate.interrupt();
        self.compaction_worker.shutdown()?;
        self.flush_worker.shutdown()?;

        let (flushing, active) = {
            let mut tables = self.inner.memtables.write();
            let flushing = tables.flushing.take();
            let active = std::mem::replace(&mut tables.active, Arc::new(MemTable::new()));
            (flushing, active)
        };
        for table in flushing.into_iter().chain(Some(active)) {
            if !table.is_empty() {
                self.inner.storage.flush(&table)?;
            }
        }

        self.inner.storage.close();
        tracing::info!("Closed engine at {}", self.inner.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Accumulated size of the active memtable
    pub fn memtable_size(&self) -> usize {
        self.inner.active_size()
    }

    /// Get the active memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.inner.memtables.read().active.entry_count()
    }

    /// Get the number of live runs
    pub fn run_count(&self) -> usize {
        self.inner.storage.run_count()
    }

    /// Whether a memtable is currently being persisted
    pub fn is_flushing(&self) -> bool {
        self.inner.memtables.read().flushing.is_some()
    }

    /// Take the last error of a size-triggered flush
    pub fn take_background_error(&self) -> Option<StrataError> {
        self.inner.background_error.lock().take()
    }
}

impl Drop for Engine {
    /// Dropping without `close` finishes queued background jobs but loses
    /// the unflushed memtable, like a crash would.
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.inner.flush_gate.interrupt();
            if let Err(e) = self.compaction_worker.shutdown() {
                tracing::error!("{}", e);
            }
            if let Err(e) = self.flush_worker.shutdown() {
                tracing::error!("{}", e);
            }
            tracing::debug!("Engine dropped without close");
        }
    }
}

impl EngineInner {
    fn active_size(&self) -> usize {
        self.memtables.read().active.size()
    }

    /// Flush job body: persist `table`, then retire it from the flushing
    /// slot, then release the gate.
    fn persist_flushing(&self, table: Arc<MemTable>, permit: FlushPermit) -> Result<()> {
        let result = self.storage.flush(&table);

        {
            let mut tables = self.memtables.write();
            if let Err(e) = &result {
                // Keep the data: newer writes in the active table win
                let restored = table
                    .iter()
                    .filter(|entry| tables.active.insert_if_absent(entry.clone()))
                    .count();
                tracing::warn!(
                    "Flush failed, restored {} entries to the active memtable: {}",
                    restored,
                    e
                );
                *self.background_error.lock() = Some(StrataError::BackgroundTask(e.to_string()));
            }
            tables.flushing = None;
        }

        drop(permit);
        result.map(|_| ())
    }

    /// Compaction job body: merge every current run into one
    fn run_compaction(&self) -> Result<()> {
        let plan = match self.storage.plan_compaction() {
            Some(plan) => plan,
            None => {
                tracing::debug!("Fewer than two runs, nothing to compact");
                return Ok(());
            }
        };

        // Sizes are fixed at file creation, so merge once to measure and
        // once more to write
        let size = RunSize::measure(Self::merge_inputs(&plan)?)?;
        let entries = Self::merge_inputs(&plan)?;
        self.storage.compact(plan, entries, size)?;
        Ok(())
    }

    fn merge_inputs(plan: &CompactionPlan) -> Result<MergeIterator> {
        let sources = plan
            .inputs
            .iter()
            .map(|run| merge::run_source(run, None, None))
            .collect::<Result<Vec<_>>>()?;
        MergeIterator::new(sources, plan.drop_tombstones)
    }
}
