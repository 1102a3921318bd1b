//! Advisory file locks around cache admission.
//!
//! Locks are per key and only advisory: they narrow the window in which two
//! processes can race to admit the same URL, they do not stop a process that
//! ignores them.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

/// Directory (inside a namespace) holding lock files.
pub const LOCK_DIR: &str = ".locks";

const LOCK_EXTENSION: &str = "lock";

/// Held exclusive lock. Released when dropped.
#[derive(Debug)]
pub struct EntryLock {
    file: File,
    path: PathBuf,
}

impl EntryLock {
    /// Block until the exclusive lock for `name` under `dir` is held.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be created or locked.
    pub fn acquire(dir: &Path, name: &str) -> io::Result<Self> {
        fs::create_dir_all(dir.join(LOCK_DIR))?;
        let path = lock_path(dir, name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        FileExt::lock_exclusive(&file)?;
        log::trace!("Acquired lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::debug!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

fn lock_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(LOCK_DIR).join(format!("{}.{}", name, LOCK_EXTENSION))
}

/// Names of every lock file under `dir`, sorted.
///
/// # Errors
///
/// Returns an I/O error if the lock directory exists but cannot be listed.
pub fn lock_names(dir: &Path) -> io::Result<Vec<String>> {
    let read_dir = match fs::read_dir(dir.join(LOCK_DIR)) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for item in read_dir {
        let path = item?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Remove the lock file for `name` unless another handle holds it.
///
/// Returns `true` if the file was removed. A missing file is not an error.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened, locked or removed.
pub fn remove_idle(dir: &Path, name: &str) -> io::Result<bool> {
    let path = lock_path(dir, name);
    let file = match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
        Err(e) => return Err(e),
    }
    let removed = fs::remove_file(&path);
    let _ = FileExt::unlock(&file);
    removed.map(|()| true)
}
