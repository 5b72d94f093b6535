use std::io::{self, Read, Write};

use crate::error::Error;

/// Byte I/O helpers
///
/// Loop on short reads/writes until the whole buffer has been transferred or
/// an unrecoverable error occurs. `std::io::ErrorKind::Interrupted` is
/// retried instead of surfaced as an error, the way a `_read_all`/`_write_all`
/// EINTR retry loop does.
///
/// Outcome of a read attempt at a record boundary, where a clean end-of-stream
/// and a mid-record end-of-stream are meaningfully different outcomes rather
/// than both being hard errors.
pub enum ReadOutcome {
    /// The full buffer was filled.
    Full,
    /// Nothing was read before hitting end-of-file; the stream ended cleanly
    /// at this boundary.
    Eof,
    /// Some bytes were read but the stream ended before the buffer was full.
    /// The caller decides whether this is a hard error or a truncated tail to
    /// discard gracefully (log replay treats it as the latter).
    Truncated,
}

/// Read exactly `buf.len()` bytes, failing on any error including EOF.
pub fn read_all<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    match read_all_or_eof(reader, buf)? {
        ReadOutcome::Full => Ok(()),
        ReadOutcome::Eof | ReadOutcome::Truncated => Err(Error::LogCorrupt),
    }
}

/// Read exactly `buf.len()` bytes, distinguishing a clean EOF (nothing read
/// yet) from a truncated read (some bytes read, then the stream ended) from
/// an actual I/O error. Used at transaction-record boundaries in the log,
/// where "no more transactions" and "a transaction record was cut short by a
/// crash" must be told apart.
pub fn read_all_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Truncated
                });
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(ReadOutcome::Full)
}

/// Write the whole buffer, retrying on short writes.
pub fn write_all<W: Write>(writer: &mut W, buf: &[u8]) -> Result<(), Error> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => return Err(Error::Io(io::Error::from(io::ErrorKind::WriteZero))),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}
