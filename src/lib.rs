//! Recoverable virtual memory: transactional, crash-safe byte segments backed
//! by files.
//!
//! A host opens an [`Rvm`] instance over a backing directory, [`Rvm::map`]s
//! named segments into ordinary byte buffers, and groups writes into
//! transactions via [`Rvm::begin_trans`]/[`Rvm::about_to_modify`] that either
//! [`Rvm::commit_trans`] durably or [`Rvm::abort_trans`] atomically. Mapping a
//! segment after an unclean shutdown reconstructs its last-committed
//! contents exactly, by replaying whatever committed transactions hadn't yet
//! been folded into the data file by [`Rvm::truncate_log`].
//!
//! This is a single-threaded, single-process library: there is no
//! concurrency between transactions on one segment (conflict is rejected at
//! `begin_trans`), no multi-process coordination, and no isolation beyond
//! "one live transaction per segment."

mod error;
mod io;
mod redo;
mod segment;
mod store;
mod transaction;

pub use error::Error;
pub use transaction::TransactionId;

use std::collections::HashMap;
use std::convert::TryInto;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;

use segment::{checked_range, Segment, Undo};
use transaction::TransactionCounter;

/// An RVM instance: a backing directory plus every segment currently mapped
/// from it. Carries no global/static state, so multiple instances, each
/// pointed at a different directory, may coexist in one process.
pub struct Rvm {
    dir: PathBuf,
    segments: HashMap<usize, Segment>,
    names: HashMap<String, usize>,
    counter: TransactionCounter,
}

impl Rvm {
    /// The backing directory this instance was opened against.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open (creating if necessary) the backing directory for this instance.
    pub fn init<P: Into<PathBuf>>(dir: P) -> Result<Rvm, Error> {
        let dir = dir.into();
        store::init(&dir)?;
        Ok(Rvm {
            dir,
            segments: HashMap::new(),
            names: HashMap::new(),
            counter: TransactionCounter::default(),
        })
    }

    /// Map a segment from disk into memory.
    ///
    /// If the segment does not already exist, it is created with size
    /// `min_size`. If it exists but is shorter than `min_size`, it is
    /// zero-extended. It is an error to map the same name twice in one
    /// process.
    ///
    /// The returned pointer is valid for exactly `[0, length)` bytes, where
    /// `length` is `max(min_size, the segment's prior on-disk length)`, and
    /// only until the matching [`Rvm::unmap`].
    pub fn map(&mut self, name: &str, min_size: usize) -> Result<*mut u8, Error> {
        store::validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(Error::AlreadyMapped);
        }

        let mut data_file = store::open_rw(&store::data_path(&self.dir, name))?;
        let mut log_file = store::open_rw(&store::log_path(&self.dir, name))?;

        let mut length = data_file.metadata()?.len() as usize;
        if length < min_size {
            data_file.set_len(min_size as u64)?;
            length = min_size;
        }

        let mut memory = vec![0u8; length];
        data_file.seek(SeekFrom::Start(0))?;
        io::read_all(&mut data_file, &mut memory)?;

        let bound: u32 = length.try_into().unwrap_or(u32::MAX);
        redo::replay(&mut log_file, Some(bound), |offset, data| {
            let offset = offset as usize;
            memory[offset..offset + data.len()].copy_from_slice(data);
            Ok(())
        })?;

        let base = memory.as_mut_ptr();
        let key = base as usize;

        let segment = Segment {
            name: name.to_string(),
            length,
            memory,
            data_file,
            log_file,
            transaction_id: None,
            undo: None,
        };

        self.segments.insert(key, segment);
        self.names.insert(name.to_string(), key);
        debug!("rvm: mapped segment {:?} ({} bytes)", name, length);

        Ok(base)
    }

    /// Release a segment's in-memory buffer and close its file handles.
    /// Does not touch the backing files. Errors if a transaction is still
    /// active on the segment.
    pub fn unmap(&mut self, base: *mut u8) -> Result<(), Error> {
        let key = base as usize;
        match self.segments.get(&key) {
            Some(segment) if segment.is_busy() => return Err(Error::SegmentBusy),
            Some(_) => {}
            None => return Err(Error::UnknownSegment),
        }

        let segment = self.segments.remove(&key).expect("checked above");
        self.names.remove(&segment.name);
        debug!("rvm: unmapped segment {:?}", segment.name);
        Ok(())
    }

    /// Unlink a segment's backing files. The segment must not be mapped.
    pub fn destroy(&mut self, name: &str) -> Result<(), Error> {
        store::validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(Error::SegmentBusy);
        }
        store::destroy(&self.dir, name)?;
        debug!("rvm: destroyed segment {:?}", name);
        Ok(())
    }

    /// Atomically enroll every listed segment in a new transaction. If any
    /// base is unmapped or already has an active transaction, none are
    /// enrolled and [`TransactionId::INVALID`] is returned.
    pub fn begin_trans(&mut self, bases: &[*mut u8]) -> TransactionId {
        for &base in bases {
            match self.segments.get(&(base as usize)) {
                Some(segment) if !segment.is_busy() => {}
                _ => return TransactionId::INVALID,
            }
        }

        let tid = self.counter.next();
        for &base in bases {
            if let Some(segment) = self.segments.get_mut(&(base as usize)) {
                segment.transaction_id = Some(tid);
                segment.undo = None;
            }
        }
        tid
    }

    /// Declare that the transaction is about to modify `[offset, offset+size)`
    /// in `base`'s segment, extending the undo range that will be restored
    /// on [`Rvm::abort_trans`]. Must be called before the host writes to the
    /// region.
    pub fn about_to_modify(
        &mut self,
        tid: TransactionId,
        base: *mut u8,
        offset: usize,
        size: usize,
    ) -> Result<(), Error> {
        let segment = self
            .segments
            .get_mut(&(base as usize))
            .ok_or(Error::UnknownSegment)?;

        if segment.transaction_id != Some(tid) {
            return Err(Error::SegmentBusy);
        }

        checked_range(segment.length, offset, size)?;

        let undo = segment.undo.take();
        segment.undo = Some(Undo::extend(undo, &segment.memory, offset, size));
        Ok(())
    }

    /// Persist every segment enrolled in `tid` by appending its undo range's
    /// *current* contents to the log as a redo record, then clear the
    /// transaction. Each log file is flushed to durable storage before this
    /// returns. A segment with no `about_to_modify` calls is left untouched
    /// on disk.
    pub fn commit_trans(&mut self, tid: TransactionId) -> Result<(), Error> {
        for segment in self.segments.values_mut() {
            if segment.transaction_id != Some(tid) {
                continue;
            }

            if let Some(undo) = segment.undo.take() {
                let data = segment.memory[undo.start..undo.end].to_vec();
                redo::append_transaction(&mut segment.log_file, undo.start as u32, &data)?;
                segment.log_file.sync_data()?;
            }

            segment.transaction_id = None;
        }
        debug!("rvm: committed transaction {}", tid.as_raw());
        Ok(())
    }

    /// Restore every segment enrolled in `tid` to its pre-transaction
    /// contents and clear the transaction. No file I/O occurs.
    pub fn abort_trans(&mut self, tid: TransactionId) {
        for segment in self.segments.values_mut() {
            if segment.transaction_id != Some(tid) {
                continue;
            }

            if let Some(undo) = segment.undo.take() {
                segment.memory[undo.start..undo.end].copy_from_slice(&undo.bytes);
            }

            segment.transaction_id = None;
        }
        debug!("rvm: aborted transaction {}", tid.as_raw());
    }

    /// Fold every segment's committed log records into its data file and
    /// shrink the log to zero length. Operates directly on the backing
    /// directory's files; safe to call while segments are mapped, since
    /// their in-memory copies are independent of the data file until the
    /// next `map`.
    pub fn truncate_log(&mut self) -> Result<(), Error> {
        for name in store::list_segment_names(&self.dir)? {
            if let Err(e) = self.truncate_one(&name) {
                log::warn!("rvm: skipping checkpoint of segment {:?}: {}", name, e);
            }
        }
        Ok(())
    }

    fn truncate_one(&self, name: &str) -> Result<(), Error> {
        let mut data_file = store::open_rw(&store::data_path(&self.dir, name))?;
        let mut log_file = store::open_rw(&store::log_path(&self.dir, name))?;
        let segment_len = data_file.metadata()?.len();
        redo::truncate_one(&mut log_file, &mut data_file, segment_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn new_rvm() -> (tempfile::TempDir, Rvm) {
        let dir = tempdir().unwrap();
        let rvm = Rvm::init(dir.path()).unwrap();
        (dir, rvm)
    }

    unsafe fn slice<'a>(base: *mut u8, len: usize) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(base, len)
    }

    #[test]
    fn test_init_creates_directory() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("rvm-store");
        Rvm::init(&dir).unwrap();
        assert!(dir.exists());
    }

    #[test]
    fn test_map_creates_and_extends() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("accounts", 500).unwrap();
        unsafe {
            slice(base, 500)[0..5].copy_from_slice(b"hello");
        }
        rvm.unmap(base).unwrap();

        let base = rvm.map("accounts", 1000).unwrap();
        let data = unsafe { slice(base, 1000) };
        assert_eq!(&data[0..5], b"hello");
        assert!(data[500..1000].iter().all(|&b| b == 0));
        rvm.unmap(base).unwrap();

        let data_path = store::data_path(&rvm.dir, "accounts");
        assert_eq!(std::fs::metadata(data_path).unwrap().len(), 1000);
    }

    #[test]
    fn test_double_map_rejected() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("a", 100).unwrap();
        assert!(matches!(rvm.map("a", 100), Err(Error::AlreadyMapped)));
        rvm.unmap(base).unwrap();
        // after unmap, mapping again is fine
        rvm.map("a", 100).unwrap();
    }

    #[test]
    fn test_basic_commit_survives_remap() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("s", 1000).unwrap();

        let tid = rvm.begin_trans(&[base]);
        rvm.about_to_modify(tid, base, 100, 6).unwrap();
        unsafe {
            slice(base, 1000)[100..106].copy_from_slice(b"AAAAA\0");
        }
        rvm.commit_trans(tid).unwrap();
        rvm.unmap(base).unwrap();

        let base = rvm.map("s", 1000).unwrap();
        assert_eq!(unsafe { &slice(base, 1000)[100..106] }, b"AAAAA\0");
    }

    #[test]
    fn test_overlapping_declarations_then_abort() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("s", 1000).unwrap();

        let tid = rvm.begin_trans(&[base]);
        rvm.about_to_modify(tid, base, 100, 6).unwrap();
        unsafe {
            slice(base, 1000)[100..106].copy_from_slice(b"AAAAA\0");
        }
        rvm.about_to_modify(tid, base, 103, 6).unwrap();
        unsafe {
            slice(base, 1000)[103..109].copy_from_slice(b"BBBBB\0");
        }
        rvm.commit_trans(tid).unwrap();

        let tid2 = rvm.begin_trans(&[base]);
        rvm.about_to_modify(tid2, base, 102, 4).unwrap();
        unsafe {
            slice(base, 1000)[102..106].copy_from_slice(b"CCC\0");
        }
        rvm.abort_trans(tid2);

        rvm.unmap(base).unwrap();
        let base = rvm.map("s", 1000).unwrap();
        assert_eq!(unsafe { &slice(base, 1000)[100..108] }, b"AAABBBBB");
    }

    #[test]
    fn test_conflicting_begin() {
        let (_tmp, mut rvm) = new_rvm();
        let a = rvm.map("a", 100).unwrap();
        let b = rvm.map("b", 100).unwrap();

        let tid_a = rvm.begin_trans(&[a]);
        assert_ne!(tid_a, TransactionId::INVALID);

        let conflict = rvm.begin_trans(&[a, b]);
        assert_eq!(conflict, TransactionId::INVALID);

        let tid_b = rvm.begin_trans(&[b]);
        assert_ne!(tid_b, TransactionId::INVALID);
        assert_ne!(tid_a, tid_b);
    }

    #[test]
    fn test_replay_on_map_without_truncate() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("s", 1000).unwrap();
        let tid = rvm.begin_trans(&[base]);
        rvm.about_to_modify(tid, base, 0, 4).unwrap();
        unsafe {
            slice(base, 1000)[0..4].copy_from_slice(b"ABCD");
        }
        rvm.commit_trans(tid).unwrap();
        rvm.unmap(base).unwrap();

        // Data file was never written to directly; only the log carries the commit.
        let data_path = store::data_path(&rvm.dir, "s");
        let mut on_disk = vec![0u8; 4];
        {
            let mut f = std::fs::File::open(&data_path).unwrap();
            f.read_exact(&mut on_disk).unwrap();
        }
        assert_eq!(on_disk, vec![0, 0, 0, 0]);

        let base = rvm.map("s", 1000).unwrap();
        assert_eq!(unsafe { &slice(base, 1000)[0..4] }, b"ABCD");
        rvm.unmap(base).unwrap();
    }

    #[test]
    fn test_truncate_folds_log_into_data() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("s", 1000).unwrap();
        let tid = rvm.begin_trans(&[base]);
        rvm.about_to_modify(tid, base, 0, 4).unwrap();
        unsafe {
            slice(base, 1000)[0..4].copy_from_slice(b"ABCD");
        }
        rvm.commit_trans(tid).unwrap();
        rvm.unmap(base).unwrap();

        rvm.truncate_log().unwrap();

        let log_path = store::log_path(&rvm.dir, "s");
        assert_eq!(std::fs::metadata(log_path).unwrap().len(), 0);

        let data_path = store::data_path(&rvm.dir, "s");
        let mut on_disk = vec![0u8; 4];
        let mut f = std::fs::File::open(&data_path).unwrap();
        f.read_exact(&mut on_disk).unwrap();
        assert_eq!(on_disk, b"ABCD");
    }

    #[test]
    fn test_truncate_idempotent() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("s", 100).unwrap();
        rvm.unmap(base).unwrap();

        rvm.truncate_log().unwrap();
        rvm.truncate_log().unwrap();

        let log_path = store::log_path(&rvm.dir, "s");
        assert_eq!(std::fs::metadata(log_path).unwrap().len(), 0);
    }

    #[test]
    fn test_unmap_while_busy_is_rejected() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("s", 100).unwrap();
        let tid = rvm.begin_trans(&[base]);
        assert!(matches!(rvm.unmap(base), Err(Error::SegmentBusy)));
        rvm.abort_trans(tid);
        rvm.unmap(base).unwrap();
    }

    #[test]
    fn test_destroy_after_unmap_starts_fresh() {
        let (_tmp, mut rvm) = new_rvm();
        let base = rvm.map("s", 100).unwrap();
        unsafe {
            slice(base, 100)[0] = 0xFF;
        }
        rvm.unmap(base).unwrap();
        rvm.destroy("s").unwrap();

        let base = rvm.map("s", 100).unwrap();
        assert_eq!(unsafe { slice(base, 100)[0] }, 0);
        rvm.unmap(base).unwrap();
    }

    #[test]
    fn test_invalid_name_rejected() {
        let (_tmp, mut rvm) = new_rvm();
        assert!(matches!(rvm.map("a/b", 10), Err(Error::InvalidName)));
    }

    #[test]
    fn test_unknown_base_is_error() {
        let (_tmp, mut rvm) = new_rvm();
        let mut bogus = [0u8; 8];
        assert!(matches!(
            rvm.unmap(bogus.as_mut_ptr()),
            Err(Error::UnknownSegment)
        ));
    }
}
