use std::io;

use derive_more::From;

/// Error
///
/// Every fallible operation exposed by this crate returns one of these variants.
/// `begin_trans` is the one exception: it keeps its historical `-1`-sentinel
/// return instead of a `Result`, matching the atomic-enrollment contract tested
/// in the integration suite.
#[derive(Debug, From)]
pub enum Error {
    /// A backing-store operation (open/create/read/write/flush/truncate) failed.
    Io(io::Error),

    /// A log file was shorter than a transaction record promised, or a record
    /// referenced an offset/length past the segment's length.
    LogCorrupt,

    /// A base address does not correspond to any currently-mapped segment.
    UnknownSegment,

    /// `map` was called for a name that is already mapped in this process.
    AlreadyMapped,

    /// The segment is enrolled in another transaction, or `unmap` was called
    /// while a transaction was still active on it.
    SegmentBusy,

    /// A requested size or declared range does not fit within the segment.
    BufferTooLarge,

    /// A segment name contained a path separator.
    InvalidName,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "backing-store error: {}", e),
            Error::LogCorrupt => write!(f, "log file is corrupt or truncated mid-record"),
            Error::UnknownSegment => write!(f, "base address is not a mapped segment"),
            Error::AlreadyMapped => write!(f, "segment is already mapped in this process"),
            Error::SegmentBusy => write!(f, "segment has an active transaction"),
            Error::BufferTooLarge => write!(f, "range does not fit within the segment"),
            Error::InvalidName => write!(f, "segment name must not contain a path separator"),
        }
    }
}

impl std::error::Error for Error {}
