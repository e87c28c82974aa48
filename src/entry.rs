//! Entry definitions
//!
//! A key paired with either a value or a tombstone.

use bytes::Bytes;

/// Width of the length prefixes in the data segment
pub(crate) const LEN_PREFIX_SIZE: usize = 8;

/// A single key-value record
///
/// `value == None` is a tombstone, which is distinct from an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Bytes,
    pub value: Option<Bytes>,
}

impl Entry {
    /// A live key-value pair
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A deletion marker for `key`
    pub fn tombstone(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Key plus value bytes, the unit of memtable size accounting
    pub fn payload_size(&self) -> usize {
        self.key.len() + self.value.as_ref().map_or(0, |v| v.len())
    }

    /// Size of this entry in a run's data segment:
    /// `[key_len: 8][key][value_len: 8][value]`
    pub fn encoded_size(&self) -> usize {
        2 * LEN_PREFIX_SIZE + self.payload_size()
    }
}
