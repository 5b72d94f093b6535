use std::fs::File;

use crate::error::Error;
use crate::transaction::TransactionId;

/// A mapped segment: its in-memory buffer, the two backing file handles, and
/// whatever transaction/undo state is currently active on it.
pub struct Segment {
    pub name: String,
    pub length: usize,
    pub memory: Vec<u8>,
    pub data_file: File,
    pub log_file: File,
    pub transaction_id: Option<TransactionId>,
    pub undo: Option<Undo>,
}

impl Segment {
    pub fn is_busy(&self) -> bool {
        self.transaction_id.is_some()
    }
}

/// The pre-transaction contents of `[start, end)`, captured the first time
/// `about_to_modify` is called in a transaction and extended monotonically
/// by every later call so it always covers the union of every declared
/// range.
pub struct Undo {
    pub start: usize,
    pub end: usize,
    pub bytes: Vec<u8>,
}

impl Undo {
    /// Extend (or create) the undo range to cover `[offset, offset+size)`.
    ///
    /// `memory` is the segment's *current* contents, used as the source for
    /// any newly-covered bytes outside the previously-saved range (those
    /// bytes must still be pre-transaction, since the host is required to
    /// call `about_to_modify` before it writes).
    pub fn extend(existing: Option<Undo>, memory: &[u8], offset: usize, size: usize) -> Undo {
        let new_end = offset + size;
        match existing {
            None => Undo {
                start: offset,
                end: new_end,
                bytes: memory[offset..new_end].to_vec(),
            },
            Some(undo) => {
                // Uses `>=` on the lower bound, so a range starting exactly at
                // the existing undo start is still treated as contained.
                if offset >= undo.start && new_end <= undo.end {
                    return undo;
                }

                let start = undo.start.min(offset);
                let end = undo.end.max(new_end);

                let mut bytes = memory[start..end].to_vec();
                let rebased_start = undo.start - start;
                bytes[rebased_start..rebased_start + undo.bytes.len()].copy_from_slice(&undo.bytes);

                Undo { start, end, bytes }
            }
        }
    }
}

/// Validate that `[offset, offset+size)` fits within a segment of the given
/// length, returning the end offset on success.
pub fn checked_range(length: usize, offset: usize, size: usize) -> Result<usize, Error> {
    let end = offset.checked_add(size).ok_or(Error::BufferTooLarge)?;
    if end > length {
        return Err(Error::BufferTooLarge);
    }
    Ok(end)
}
