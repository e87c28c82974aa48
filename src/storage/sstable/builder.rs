//! SSTable Builder
//!
//! Writes sorted entries into a new run through writable memory maps.

use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::comparator;
use crate::entry::Entry;
use crate::error::Result;
use crate::StrataError;

use super::{data_path, index_path, RunSize, SSTable, INDEX_RECORD_SIZE, TOMBSTONE_LEN};

/// Builder for creating a new run from sorted entries
///
/// Files are created at their final size, so the caller must measure the
/// entries (see [`RunSize::measure`]) before building.
pub struct SSTableBuilder {
    id: u64,
    data_file: File,
    index_file: File,
    data: MmapMut,
    index: MmapMut,
    /// Current write position in the data segment
    data_offset: usize,
    /// Current write position in the index segment
    index_offset: usize,
    entry_count: u64,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
}

impl SSTableBuilder {
    /// Create both files of run `id` in `dir`, sized and mapped for writing
    pub fn create(dir: &Path, id: u64, size: RunSize) -> Result<Self> {
        if size.is_empty() {
            return Err(StrataError::Storage(
                "Cannot build an empty sorted run".to_string(),
            ));
        }
        if size.index_bytes != size.entry_count * INDEX_RECORD_SIZE as u64 {
            return Err(StrataError::Storage(format!(
                "Index size {} does not match {} entries",
                size.index_bytes, size.entry_count
            )));
        }

        let data_file = Self::allocate(&data_path(dir, id), size.data_bytes)?;
        let index_file = Self::allocate(&index_path(dir, id), size.index_bytes)?;

        // SAFETY: the files were just created by us and nothing else maps
        // or writes them until `finish` has synced and released the maps.
        let data = unsafe { MmapMut::map_mut(&data_file)? };
        let index = unsafe { MmapMut::map_mut(&index_file)? };

        Ok(Self {
            id,
            data_file,
            index_file,
            data,
            index,
            data_offset: 0,
            index_offset: 0,
            entry_count: 0,
            min_key: None,
            max_key: None,
        })
    }

    fn allocate(path: &Path, len: u64) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        Ok(file)
    }

    /// Append an entry (must be called in strictly ascending key order)
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.max_key {
            if comparator::compare(entry.key(), last) != Ordering::Greater {
                return Err(StrataError::Storage(format!(
                    "Keys out of order in run {}: {:?} after {:?}",
                    self.id,
                    entry.key(),
                    last
                )));
            }
        }

        let needed = entry.encoded_size();
        if self.data_offset + needed > self.data.len()
            || self.index_offset + INDEX_RECORD_SIZE > self.index.len()
        {
            return Err(StrataError::Storage(format!(
                "Run {} exceeds its precomputed size",
                self.id
            )));
        }

        // Index record: [sequence][data offset]
        let record = &mut self.index[self.index_offset..self.index_offset + INDEX_RECORD_SIZE];
        record[..8].copy_from_slice(&self.entry_count.to_le_bytes());
        record[8..].copy_from_slice(&(self.data_offset as u64).to_le_bytes());
        self.index_offset += INDEX_RECORD_SIZE;

        // Data entry: [key_len][key][value_len][value]
        let key = entry.key();
        let value_len = match entry.value() {
            Some(v) => v.len() as i64,
            None => TOMBSTONE_LEN,
        };
        self.put(&(key.len() as i64).to_le_bytes());
        self.put(key);
        self.put(&value_len.to_le_bytes());
        if let Some(v) = entry.value() {
            self.put(v);
        }

        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.max_key = Some(key.to_vec());
        self.entry_count += 1;

        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.data_offset + bytes.len();
        self.data[self.data_offset..end].copy_from_slice(bytes);
        self.data_offset = end;
    }

    /// Finish building: check every byte was written, force the maps to
    /// disk and release them. The run is not live until the manifest says so.
    pub fn finish(self) -> Result<SSTable> {
        if self.data_offset != self.data.len() || self.index_offset != self.index.len() {
            return Err(StrataError::Storage(format!(
                "Run {} written {}/{} data bytes and {}/{} index bytes",
                self.id,
                self.data_offset,
                self.data.len(),
                self.index_offset,
                self.index.len()
            )));
        }

        let SSTableBuilder {
            id,
            data_file,
            index_file,
            data,
            index,
            data_offset,
            index_offset,
            entry_count,
            min_key,
            max_key,
        } = self;

        data.flush()?;
        index.flush()?;
        drop(data);
        drop(index);
        data_file.sync_all()?;
        index_file.sync_all()?;

        Ok(SSTable {
            id,
            entry_count,
            data_bytes: data_offset as u64,
            index_bytes: index_offset as u64,
            min_key: min_key.unwrap_or_default(),
            max_key: max_key.unwrap_or_default(),
        })
    }
}
