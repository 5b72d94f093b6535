use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Error;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// Backing-store layout
///
/// Every segment `S` occupies two files in the RVM instance's directory:
///
/// ```text
/// <dir>/seg.<S>   data file, ground truth as of the last truncate_log
/// <dir>/log.<S>   redo log, committed transactions not yet folded in
/// ```
///
/// This module owns path construction, directory/file creation and their
/// permissions, and unlinking on `destroy`.

const SEG_PREFIX: &str = "seg.";
const LOG_PREFIX: &str = "log.";

/// Reject names that could escape the backing directory.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidName);
    }
    Ok(())
}

pub fn data_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{}", SEG_PREFIX, name))
}

pub fn log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{}", LOG_PREFIX, name))
}

/// Strip the `seg.` prefix from a directory entry's filename, if present.
pub fn segment_name_from_data_filename(filename: &str) -> Option<&str> {
    filename.strip_prefix(SEG_PREFIX)
}

/// Ensure the backing directory exists, creating it at mode 0o755 if needed.
/// An already-existing directory is not an error.
pub fn init(dir: &Path) -> Result<(), Error> {
    match fs::create_dir(dir) {
        Ok(()) => {
            #[cfg(unix)]
            {
                let mut perms = fs::metadata(dir)?.permissions();
                perms.set_mode(0o755);
                fs::set_permissions(dir, perms)?;
            }
            Ok(())
        }
        Err(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Open (creating if necessary) a backing file at mode 0o644.
pub fn open_rw(path: &Path) -> Result<File, Error> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    options.mode(0o644);
    Ok(options.open(path)?)
}

/// Unlink both backing files for a segment. Missing files are not an error:
/// `destroy` is idempotent with respect to a segment that was never mapped.
pub fn destroy(dir: &Path, name: &str) -> Result<(), Error> {
    for path in [data_path(dir, name), log_path(dir, name)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

/// Enumerate every segment name present in the backing directory, in the
/// order `read_dir` yields entries (filesystem order is not guaranteed; the
/// caller must not depend on a particular sequence across segments).
pub fn list_segment_names(dir: &Path) -> Result<Vec<String>, Error> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name();
        let filename = filename.to_string_lossy();
        if let Some(name) = segment_name_from_data_filename(&filename) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
