//! Meta record
//!
//! The single source of truth for which runs exist. A run's files become
//! live only when the record listing them has been durably replaced; files
//! not listed are leftovers of an interrupted flush or compaction.
//!
//! The run list is kept in commit order, which is recency order. Run numbers
//! only name files: a compaction reserves its number when it is planned, so a
//! flush that started earlier may carry a lower number yet commit later.
//!
//! ## File Format
//! ```text
//! meta
//! ┌──────────────┬────────────────────────────────────────┐
//! │ CRC32 (4)    │ bincode(MetaRecord)                    │
//! └──────────────┴────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::StrataError;

const META_FILENAME: &str = "meta";
const META_TMP_FILENAME: &str = "meta.tmp";
const CRC_SIZE: usize = 4;

/// Persisted content of the meta record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    /// Live run numbers in commit order, oldest → newest
    pub runs: Vec<u64>,
    /// Next run number to hand out
    pub next_run_id: u64,
}

impl MetaRecord {
    fn is_consistent(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.runs.len());
        self.runs
            .iter()
            .all(|id| *id < self.next_run_id && seen.insert(*id))
    }
}

/// How the record was found at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaState {
    /// Decoded and checksummed successfully
    Loaded,
    /// No record on disk; a zero-run record was written
    Created,
    /// Present but unreadable; treated as zero runs
    Garbled,
}

/// In-memory owner of the meta record
#[derive(Debug)]
pub struct Manifest {
    dir: PathBuf,
    record: MetaRecord,
}

impl Manifest {
    /// Load the record from `dir`, creating it when missing
    pub fn load(dir: &Path) -> Result<(Self, MetaState)> {
        let path = dir.join(META_FILENAME);
        let mut manifest = Self {
            dir: dir.to_path_buf(),
            record: MetaRecord::default(),
        };

        if !path.exists() {
            manifest.persist()?;
            return Ok((manifest, MetaState::Created));
        }

        match Self::decode(&fs::read(&path)?) {
            Some(record) => {
                manifest.record = record;
                Ok((manifest, MetaState::Loaded))
            }
            None => {
                tracing::warn!(
                    "Meta record {} is garbled, starting with zero runs",
                    path.display()
                );
                Ok((manifest, MetaState::Garbled))
            }
        }
    }

    fn decode(bytes: &[u8]) -> Option<MetaRecord> {
        if bytes.len() < CRC_SIZE {
            return None;
        }
        let (crc, payload) = bytes.split_at(CRC_SIZE);
        let stored = u32::from_le_bytes(crc.try_into().ok()?);
        if stored != crc32fast::hash(payload) {
            return None;
        }
        bincode::deserialize::<MetaRecord>(payload)
            .ok()
            .filter(MetaRecord::is_consistent)
    }

    /// Atomically replace the on-disk record: write a temp file, fsync it,
    /// rename it over the old one
    fn persist(&self) -> Result<()> {
        let payload = bincode::serialize(&self.record)?;
        let tmp_path = self.dir.join(META_TMP_FILENAME);

        let mut file = File::create(&tmp_path)?;
        file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, self.dir.join(META_FILENAME))?;

        // Persist the rename itself; directories cannot be opened on every platform
        if let Ok(dir) = File::open(&self.dir) {
            if let Err(e) = dir.sync_all() {
                tracing::warn!(
                    "Failed to sync {} after replacing the meta record: {}",
                    self.dir.display(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Replace the record with `next`, leaving memory untouched on failure
    fn commit(&mut self, next: MetaRecord) -> Result<()> {
        let previous = std::mem::replace(&mut self.record, next);
        if let Err(e) = self.persist() {
            self.record = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Hand out a run number; it is persisted with the next commit
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.record.next_run_id;
        self.record.next_run_id += 1;
        id
    }

    /// Make run `id` live as the newest run
    pub fn commit_append(&mut self, id: u64) -> Result<()> {
        let mut next = self.record.clone();
        if next.runs.contains(&id) {
            return Err(StrataError::Storage(format!("Run {} is already live", id)));
        }
        next.runs.push(id);
        next.next_run_id = next.next_run_id.max(id + 1);
        self.commit(next)
    }

    /// Retire `inputs` and, if the merge produced anything, make `output`
    /// live in their place
    ///
    /// The output takes the slot of the newest input: runs committed after
    /// that input stay newer than the output whatever their numbers.
    pub fn commit_replace(&mut self, inputs: &[u64], output: Option<u64>) -> Result<()> {
        if let Some(missing) = inputs.iter().find(|id| !self.record.runs.contains(id)) {
            return Err(StrataError::Storage(format!(
                "Compaction input run {} is no longer live",
                missing
            )));
        }

        let mut next = self.record.clone();
        let slot = replacement_slot(&next.runs, inputs);
        next.runs.retain(|id| !inputs.contains(id));
        if let Some(id) = output {
            next.runs.insert(slot, id);
            next.next_run_id = next.next_run_id.max(id + 1);
        }
        self.commit(next)
    }

    /// Never hand out numbers below `id`
    pub fn skip_to(&mut self, id: u64) {
        self.record.next_run_id = self.record.next_run_id.max(id);
    }

    /// Live run numbers in commit order, oldest → newest
    pub fn runs(&self) -> &[u64] {
        &self.record.runs
    }

    pub fn run_count(&self) -> usize {
        self.record.runs.len()
    }

    pub fn next_run_id(&self) -> u64 {
        self.record.next_run_id
    }

    /// Path of the meta file inside `dir`
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(META_FILENAME)
    }
}

/// Index the merged run takes once `inputs` are removed from `runs`
fn replacement_slot(runs: &[u64], inputs: &[u64]) -> usize {
    match runs.iter().rposition(|id| inputs.contains(id)) {
        Some(newest) => runs[..newest].iter().filter(|id| !inputs.contains(id)).count(),
        None => 0,
    }
}
