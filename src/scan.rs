//! Offline corruption scanner.
//!
//! Walks an arbitrary directory tree, not only cache namespaces, and deletes
//! every regular file that fails structural validation. Files can land in a
//! data tree by paths that bypass the cache store, so the cache's own sweep
//! is not enough to keep the tree clean.
//!
//! # Example
//!
//! ```no_run
//! use dlcache::scan::Scanner;
//! use dlcache::validate::Validator;
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! let scanner = Scanner::new(Validator::new(BTreeMap::new())).dry_run(true);
//! let report = scanner.scan(Path::new("/var/lib/phpvm")).unwrap();
//! println!("{} of {} files would be deleted", report.deleted, report.checked);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use walkdir::WalkDir;

use crate::cache::entry::{DATA_EXTENSION, META_EXTENSION};
use crate::cache::{CacheKey, CacheMetadata, CacheStore};
use crate::progress::ProgressCallback;
use crate::validate::{FileKind, Validator};

/// File names never inspected.
pub const SENTINEL_NAMES: &[&str] = &[".gitkeep", ".keep", ".placeholder", ".last_cleanup"];

/// Errors that stop a scan before it starts.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The root does not exist.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The root exists but is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The root could not be inspected.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// A file removed (or, in dry-run mode, that would be removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedFile {
    /// Path relative to the scan root.
    pub path: PathBuf,
    /// Size in bytes before deletion.
    pub size: u64,
    /// Why the file failed validation.
    pub reason: String,
}

/// A file that failed validation but could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    /// Path relative to the scan root.
    pub path: PathBuf,
    /// What went wrong.
    pub message: String,
}

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Scan root.
    pub root: PathBuf,
    /// Whether files were only reported, not deleted.
    pub dry_run: bool,
    /// Regular files validated.
    pub checked: usize,
    /// Sentinel files and unreadable directory entries passed over.
    pub skipped: usize,
    /// Files deleted.
    pub deleted: usize,
    /// Sum of deleted file sizes.
    pub bytes_freed: u64,
    /// Every deleted file.
    pub deleted_files: Vec<DeletedFile>,
    /// Invalid files that could not be deleted.
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    /// True if at least one invalid file could not be removed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Store-agnostic tree scanner.
pub struct Scanner {
    validator: Validator,
    dry_run: bool,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Scanner {
    /// Create a scanner applying `validator` to every file.
    #[must_use]
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            dry_run: false,
            progress: None,
        }
    }

    /// Report invalid files without deleting them.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Report progress through `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Scan `root` recursively. Symlinks are not followed.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] only if `root` is missing or not a directory.
    /// Problems with individual files are logged and recorded in the report.
    pub fn scan(&self, root: &Path) -> Result<ScanReport, ScanError> {
        match fs::metadata(root) {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Err(ScanError::NotADirectory(root.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScanError::NotFound(root.to_path_buf()))
            }
            Err(e) => {
                return Err(ScanError::Io {
                    path: root.to_path_buf(),
                    source: e,
                })
            }
        }

        let mut report = ScanReport {
            root: root.to_path_buf(),
            dry_run: self.dry_run,
            ..Default::default()
        };
        if let Some(progress) = &self.progress {
            progress.on_start("Scanning");
        }

        for item in WalkDir::new(root).follow_links(false) {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }
            if is_sentinel(item.file_name().to_string_lossy().as_ref()) {
                log::trace!("Skipping sentinel {}", item.path().display());
                report.skipped += 1;
                continue;
            }

            report.checked += 1;
            if let Some(progress) = &self.progress {
                progress.on_progress(report.checked, &item.path().to_string_lossy());
            }
            self.check_file(root, item.path(), &mut report);
        }

        if let Some(progress) = &self.progress {
            progress.on_finish();
        }
        log::info!(
            "Scan of {}: {} checked, {} deleted, {} bytes freed, {} failures",
            root.display(),
            report.checked,
            report.deleted,
            report.bytes_freed,
            report.failures.len()
        );
        Ok(report)
    }

    fn check_file(&self, root: &Path, path: &Path, report: &mut ScanReport) {
        let reason = match self.validator.inspect_as(path, kind_of(path)) {
            Ok(_) => return,
            Err(e) => e.to_string(),
        };
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let size = fs::symlink_metadata(path).map(|m| m.len()).unwrap_or(0);

        if !self.dry_run {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("Failed to delete {}: {}", path.display(), e);
                report.failures.push(ScanFailure {
                    path: relative,
                    message: e.to_string(),
                });
                return;
            }
            log::info!("Deleted invalid file {} ({})", relative.display(), reason);
            if let Some(progress) = &self.progress {
                progress.on_removed(size);
            }
        } else {
            log::info!("Would delete {} ({})", relative.display(), reason);
        }

        report.deleted += 1;
        report.bytes_freed += size;
        report.deleted_files.push(DeletedFile {
            path: relative,
            size,
            reason,
        });
    }
}

/// Kind a file is validated as.
///
/// A cache data artifact (`<key>.data`) carries no extension of its own, so
/// it is judged by the kind its sibling metadata record describes. Anything
/// else is judged by its file name.
#[must_use]
pub fn kind_of(path: &Path) -> FileKind {
    let is_data = path.extension().and_then(|e| e.to_str()) == Some(DATA_EXTENSION);
    let has_key = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(CacheKey::parse)
        .is_some();
    if is_data && has_key {
        if let Ok(metadata) = CacheMetadata::load(&path.with_extension(META_EXTENSION)) {
            return CacheStore::kind_for(&metadata.url, &metadata.original_path);
        }
    }
    FileKind::from_path(path)
}

/// Lock files and placeholders are never validated.
#[must_use]
pub fn is_sentinel(file_name: &str) -> bool {
    file_name.ends_with(".lock") || SENTINEL_NAMES.contains(&file_name)
}
