use std::convert::TryInto;
use std::fs::File;
use std::io::{Seek, SeekFrom};

use log::error;

use crate::error::Error;
use crate::io::{read_all_or_eof, write_all, ReadOutcome};

/// Log format & replay
///
/// Binary, append-only, little-endian, unaligned:
///
/// ```text
/// record_stream := transaction*
/// transaction   := u32 count, update{count}
/// update        := u32 offset, u32 length, byte[length]
/// ```
///
/// `count` is always 1 at commit time (undo bookkeeping coalesces every
/// transaction into a single contiguous range per segment), but the format
/// carries the count so a future writer could batch disjoint ranges without
/// a format break.
///
/// Replay is shared by two call sites: folding the log into an in-memory
/// segment on `map`, and folding it into the data file on `truncate_log`.
/// Both drive the same parser over a sink closure so the two don't drift.

/// Append one transaction record containing exactly one update.
pub fn append_transaction(log_file: &mut File, offset: u32, data: &[u8]) -> Result<(), Error> {
    log_file.seek(SeekFrom::End(0))?;
    write_all(log_file, &1u32.to_le_bytes())?;
    write_all(log_file, &offset.to_le_bytes())?;
    write_all(log_file, &(data.len() as u32).to_le_bytes())?;
    write_all(log_file, data)?;
    Ok(())
}

/// Replay every transaction record in `log_file` from the beginning, handing
/// each update's `(offset, bytes)` to `apply`. `bound`, when given, is the
/// addressable length an update's `offset + length` must not exceed; an
/// update that would run past it is treated the same as a short read (see
/// below).
///
/// A short read, or an out-of-bounds offset/length, found partway through a
/// transaction record is *not* returned as an error: it is the shape a crash
/// mid-`commit_trans` leaves behind, so replay simply stops there. Every
/// transaction fully consumed before that point has already been handed to
/// `apply`. Fully out-of-range data is logged at `error!` so a host watching
/// logs can tell a truncated tail was discarded.
pub fn replay<F>(log_file: &mut File, bound: Option<u32>, mut apply: F) -> Result<(), Error>
where
    F: FnMut(u32, &[u8]) -> Result<(), Error>,
{
    log_file.seek(SeekFrom::Start(0))?;
    loop {
        let mut count_buf = [0u8; 4];
        match read_all_or_eof(log_file, &mut count_buf)? {
            ReadOutcome::Eof => return Ok(()),
            ReadOutcome::Truncated => {
                error!("rvm: log ended mid-transaction header, discarding truncated tail");
                return Ok(());
            }
            ReadOutcome::Full => {}
        }
        let count = u32::from_le_bytes(count_buf);

        for _ in 0..count {
            match read_update(log_file, bound)? {
                Some((offset, data)) => apply(offset, &data)?,
                None => {
                    error!("rvm: log ended mid-transaction, discarding truncated tail");
                    return Ok(());
                }
            }
        }
    }
}

/// Read one `(offset, length, bytes)` update. Returns `Ok(None)` if the
/// stream ends, is cut short, or a bound check fails partway through: all
/// three are treated as "truncated tail", not a hard error.
fn read_update(log_file: &mut File, bound: Option<u32>) -> Result<Option<(u32, Vec<u8>)>, Error> {
    let mut header = [0u8; 8];
    match read_all_or_eof(log_file, &mut header)? {
        ReadOutcome::Eof | ReadOutcome::Truncated => return Ok(None),
        ReadOutcome::Full => {}
    }
    let offset = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let length = u32::from_le_bytes(header[4..8].try_into().unwrap());

    if let Some(bound) = bound {
        if (offset as u64) + (length as u64) > bound as u64 {
            return Ok(None);
        }
    }

    let mut data = vec![0u8; length as usize];
    match read_all_or_eof(log_file, &mut data)? {
        ReadOutcome::Full => Ok(Some((offset, data))),
        ReadOutcome::Eof | ReadOutcome::Truncated => Ok(None),
    }
}

/// Fold every record in `log_file` into `data_file` via positioned writes,
/// then truncate `log_file` to zero length. `segment_len` bounds offsets the
/// same way `replay` does when applied to an in-memory segment.
pub fn truncate_one(log_file: &mut File, data_file: &mut File, segment_len: u64) -> Result<(), Error> {
    let bound: u32 = segment_len.try_into().unwrap_or(u32::MAX);
    replay(log_file, Some(bound), |offset, data| {
        data_file.seek(SeekFrom::Start(offset as u64))?;
        write_all(data_file, data)?;
        Ok(())
    })?;
    data_file.sync_data()?;
    log_file.set_len(0)?;
    log_file.seek(SeekFrom::Start(0))?;
    Ok(())
}
