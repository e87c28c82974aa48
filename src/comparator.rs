//! Byte-sequence comparator
//!
//! Lexicographic ordering used everywhere keys are compared: find the first
//! index at which two sequences differ and compare the bytes there; when one
//! is a prefix of the other the shorter one sorts first. This agrees with
//! `<[u8] as Ord>::cmp`, which is what the memtable's skip list relies on.

use std::cmp::Ordering;

/// Index of the first byte at which `a` and `b` differ.
///
/// Returns `None` for identical sequences. When one sequence is a proper
/// prefix of the other, the mismatch index is the length of the shorter one.
pub fn mismatch(a: &[u8], b: &[u8]) -> Option<usize> {
    let common = a.len().min(b.len());
    match a[..common].iter().zip(&b[..common]).position(|(x, y)| x != y) {
        Some(idx) => Some(idx),
        None if a.len() == b.len() => None,
        None => Some(common),
    }
}

/// Compare two byte sequences lexicographically
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    match mismatch(a, b) {
        None => Ordering::Equal,
        Some(idx) if idx == a.len() => Ordering::Less,
        Some(idx) if idx == b.len() => Ordering::Greater,
        Some(idx) => a[idx].cmp(&b[idx]),
    }
}

/// Compare `key` against `len` bytes of `region` starting at `offset`
/// without copying them out.
///
/// Returns `None` if the sub-range does not fit inside `region`, which for
/// a mapped run means the file is truncated.
pub fn compare_in_region(key: &[u8], region: &[u8], offset: usize, len: usize) -> Option<Ordering> {
    let end = offset.checked_add(len)?;
    region.get(offset..end).map(|other| compare(key, other))
}
