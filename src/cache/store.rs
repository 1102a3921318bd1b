//! File-backed cache store.
//!
//! # Overview
//!
//! A [`CacheStore`] maps source URLs to locally stored artifacts inside one
//! namespace directory. Each entry is a data artifact plus a JSON metadata
//! record (see [`super::entry`]).
//!
//! Reads re-validate: [`CacheStore::get`] walks a fixed sequence of checks
//! and evicts the entry on the first failure, so a stale or corrupt entry
//! never survives a failed read. Writes validate first: [`CacheStore::set`]
//! refuses a source file that fails structural validation before touching
//! the store.
//!
//! # Example
//!
//! ```no_run
//! use dlcache::cache::{CacheStore, SetOptions};
//! use dlcache::config::Config;
//! use std::path::Path;
//!
//! let store = CacheStore::new(Path::new("/var/cache/dlcache/downloads"), &Config::default());
//! let url = "https://www.php.net/distributions/php-8.3.0.tar.gz";
//!
//! let path = match store.get(url, true) {
//!     Some(path) => path,
//!     None => {
//!         // download to /tmp/php.tgz, then admit it
//!         store.set(url, Path::new("/tmp/php.tgz"), &SetOptions::default());
//!         Path::new("/tmp/php.tgz").to_path_buf()
//!     }
//! };
//! println!("using {}", path.display());
//! ```

use std::collections::BTreeMap;
use std::fs::{self, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use super::entry::{CacheEntry, CacheMetadata, MetadataError, DATA_EXTENSION, META_EXTENSION};
use super::key::CacheKey;
use super::lock::{self, EntryLock};
use crate::checksum::{self, Algorithm, ChecksumError};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::logging::{CacheLogger, CacheOp, LogCacheLogger};
use crate::validate::{FileKind, ValidationError, Validator};

/// Errors from fallible store operations.
///
/// The boolean/optional public API logs these and collapses them; the
/// `try_*` variants return them.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The cache is disabled by configuration.
    #[error("cache is disabled")]
    Disabled,

    /// The candidate file failed structural validation.
    #[error("rejected {path}: {source}")]
    Rejected {
        /// Candidate file
        path: PathBuf,
        /// Why it was rejected
        #[source]
        source: ValidationError,
    },

    /// Caller-supplied checksums do not match the admitted bytes.
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(PathBuf),

    /// The source changed size while it was being copied.
    #[error("size changed during copy of {path}: expected {expected} bytes, copied {actual}")]
    SizeChanged {
        /// Source file
        path: PathBuf,
        /// Size before copying
        expected: u64,
        /// Bytes copied
        actual: u64,
    },

    /// Digest computation failed.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Metadata could not be read or written.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The advisory lock could not be taken.
    #[error("failed to lock {path}: {source}")]
    Lock {
        /// Namespace directory
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A filesystem operation failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Why a lookup missed. Each variant maps to the reason logged with the miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// The cache is disabled.
    Disabled,
    /// One or both artifacts are absent.
    NotFound,
    /// The metadata record is unreadable or invalid.
    MetadataCorrupt,
    /// The record belongs to a different URL.
    UrlMismatch,
    /// The entry is older than the TTL.
    Expired,
    /// The data artifact length differs from the record.
    SizeMismatch,
    /// A recorded checksum does not match.
    ChecksumMismatch,
    /// The data artifact fails structural validation.
    StructurallyInvalid,
}

impl MissReason {
    /// Human-readable reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "cache disabled",
            Self::NotFound => "file not found",
            Self::MetadataCorrupt => "metadata corrupt",
            Self::UrlMismatch => "url mismatch",
            Self::Expired => "expired",
            Self::SizeMismatch => "size mismatch",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::StructurallyInvalid => "structurally invalid",
        }
    }
}

impl std::fmt::Display for MissReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`CacheStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Expected checksums (algorithm name to hex). Recorded as-is, after
    /// being verified against the admitted bytes when `verify_on_set` is on.
    pub checksums: Option<BTreeMap<String, String>>,
    /// Algorithms to compute when `checksums` is not supplied.
    /// Defaults to the configured algorithms for the file's kind.
    pub algorithms: Option<Vec<Algorithm>>,
}

impl SetOptions {
    /// Options carrying expected checksums.
    #[must_use]
    pub fn with_checksums(checksums: BTreeMap<String, String>) -> Self {
        Self {
            checksums: Some(checksums),
            algorithms: None,
        }
    }
}

/// Entry count and disk usage of one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of metadata records.
    pub count: usize,
    /// Bytes used by data artifacts and metadata records.
    pub total_bytes: u64,
}

/// A namespace directory of cache entries.
#[derive(Clone)]
pub struct CacheStore {
    dir: PathBuf,
    config: Config,
    validator: Validator,
    logger: Arc<dyn CacheLogger>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("dir", &self.dir)
            .field("ttl_secs", &self.config.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Create a store rooted at `dir`.
    ///
    /// The directory is created on first admission, not here.
    #[must_use]
    pub fn new(dir: &Path, config: &Config) -> Self {
        Self {
            dir: dir.to_path_buf(),
            validator: Validator::new(config.file_types.clone()),
            config: config.clone(),
            logger: Arc::new(LogCacheLogger),
            clock: Arc::new(SystemClock),
        }
    }

    /// Route cache events to `logger`.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn CacheLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Read "now" from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Namespace directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Structural validator used for admission and read-time checks.
    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Injected event logger.
    #[must_use]
    pub fn logger(&self) -> &dyn CacheLogger {
        self.logger.as_ref()
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Locate the entry for `url` (it may not exist).
    #[must_use]
    pub fn entry_for(&self, url: &str) -> CacheEntry {
        CacheEntry::locate(&self.dir, CacheKey::from_url(url))
    }

    /// Kind used to validate an artifact: from the URL, else from the
    /// original file name.
    #[must_use]
    pub fn kind_for(url: &str, original_path: &str) -> FileKind {
        match FileKind::from_name(url) {
            FileKind::Generic => FileKind::from_name(original_path),
            kind => kind,
        }
    }

    /// Look up `url` with the configured `verify_on_hit` policy.
    #[must_use]
    pub fn lookup(&self, url: &str) -> Option<PathBuf> {
        self.get(url, self.config.integrity.verify_on_hit)
    }

    /// Return the data artifact path for `url` if a valid entry exists.
    ///
    /// Checks run in order and short-circuit: presence, metadata parse, URL
    /// equality, TTL, then (when `verify_integrity` and integrity checking is
    /// enabled) size, checksums, and structure. Any failure evicts the entry
    /// and logs the reason before returning `None`.
    #[must_use]
    pub fn get(&self, url: &str, verify_integrity: bool) -> Option<PathBuf> {
        let entry = self.entry_for(url);
        match self.check(url, &entry, verify_integrity) {
            Ok(()) => {
                self.logger
                    .cache_operation(CacheOp::Hit, entry.key.as_str(), url);
                touch_access(&entry.data_path);
                Some(entry.data_path)
            }
            Err(MissReason::Disabled) => {
                self.logger.cache_operation(
                    CacheOp::Miss,
                    entry.key.as_str(),
                    MissReason::Disabled.as_str(),
                );
                None
            }
            Err(reason) => {
                self.logger
                    .cache_operation(CacheOp::Miss, entry.key.as_str(), reason.as_str());
                if let Err(e) = self.evict(&entry) {
                    self.logger
                        .warn(&format!("Failed to evict {}: {}", entry.key, e));
                }
                None
            }
        }
    }

    fn check(&self, url: &str, entry: &CacheEntry, verify: bool) -> Result<(), MissReason> {
        if !self.config.enabled {
            return Err(MissReason::Disabled);
        }
        if !entry.is_present() {
            return Err(MissReason::NotFound);
        }

        let metadata = entry.metadata().map_err(|e| {
            self.logger.debug(&e.to_string());
            MissReason::MetadataCorrupt
        })?;
        if metadata.url != url {
            return Err(MissReason::UrlMismatch);
        }
        if metadata.is_expired(self.now(), self.config.ttl_secs) {
            return Err(MissReason::Expired);
        }

        if !(verify && self.config.integrity.enabled) {
            return Ok(());
        }

        if entry.data_len() != metadata.size {
            return Err(MissReason::SizeMismatch);
        }
        if !metadata.checksums.is_empty() {
            match checksum::verify(&entry.data_path, &metadata.checksums) {
                Ok(true) => {}
                Ok(false) => return Err(MissReason::ChecksumMismatch),
                Err(e) => {
                    self.logger.debug(&e.to_string());
                    return Err(MissReason::ChecksumMismatch);
                }
            }
        }
        let kind = Self::kind_for(&metadata.url, &metadata.original_path);
        if let Err(e) = self.validator.inspect_as(&entry.data_path, kind) {
            self.logger.debug(&format!("{}: {}", entry.key, e));
            return Err(MissReason::StructurallyInvalid);
        }
        Ok(())
    }

    /// Admit `source` under `url`. Returns `false` (and logs why) on failure.
    pub fn set(&self, url: &str, source: &Path, options: &SetOptions) -> bool {
        match self.try_set(url, source, options) {
            Ok(_) => true,
            Err(CacheError::Disabled) => {
                self.logger.debug("Cache disabled, not admitting");
                false
            }
            Err(e @ (CacheError::Rejected { .. } | CacheError::ChecksumMismatch(_))) => {
                self.logger.warn(&format!("Not caching {}: {}", url, e));
                false
            }
            Err(e) => {
                self.logger.error(&format!("Failed to cache {}: {}", url, e));
                false
            }
        }
    }

    /// Admit `source` under `url`.
    ///
    /// The source is validated before anything is written. If the copy
    /// succeeds but a later step fails, the copied data artifact is removed
    /// so no data-without-metadata is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Disabled`], [`CacheError::Rejected`] for a
    /// structurally invalid source, [`CacheError::ChecksumMismatch`] when
    /// supplied checksums do not match, or an I/O/metadata error.
    pub fn try_set(
        &self,
        url: &str,
        source: &Path,
        options: &SetOptions,
    ) -> Result<CacheEntry, CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }

        let kind = Self::kind_for(url, &source.to_string_lossy());
        self.validator
            .inspect_as(source, kind)
            .map_err(|e| CacheError::Rejected {
                path: source.to_path_buf(),
                source: e,
            })?;
        let expected_size = fs::metadata(source)
            .map_err(|e| CacheError::io(source, e))?
            .len();

        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let entry = self.entry_for(url);

        let _lock = if self.config.file_lock {
            Some(
                EntryLock::acquire(&self.dir, entry.key.as_str()).map_err(|e| {
                    CacheError::Lock {
                        path: self.dir.clone(),
                        source: e,
                    }
                })?,
            )
        } else {
            None
        };

        let copied = match copy_artifact(source, &entry.data_path) {
            Ok(n) => n,
            Err(e) => {
                remove_if_exists(&entry.data_path);
                return Err(CacheError::io(&entry.data_path, e));
            }
        };

        let finish = || -> Result<(), CacheError> {
            if copied != expected_size {
                return Err(CacheError::SizeChanged {
                    path: source.to_path_buf(),
                    expected: expected_size,
                    actual: copied,
                });
            }
            let checksums = self.checksums_for(&entry.data_path, kind, options)?;
            let metadata = CacheMetadata::new(url, self.now(), copied, checksums, source);
            metadata.save(&entry.meta_path)?;
            Ok(())
        };

        if let Err(e) = finish() {
            remove_if_exists(&entry.data_path);
            return Err(e);
        }

        self.logger.cache_operation(
            CacheOp::Set,
            entry.key.as_str(),
            &format!("{} ({} bytes)", url, copied),
        );
        Ok(entry)
    }

    fn checksums_for(
        &self,
        data_path: &Path,
        kind: FileKind,
        options: &SetOptions,
    ) -> Result<BTreeMap<String, String>, CacheError> {
        let integrity = &self.config.integrity;
        if let Some(expected) = options.checksums.as_ref().filter(|c| !c.is_empty()) {
            if integrity.enabled
                && integrity.verify_on_set
                && !checksum::verify(data_path, expected)?
            {
                return Err(CacheError::ChecksumMismatch(data_path.to_path_buf()));
            }
            return Ok(expected.clone());
        }
        if !integrity.enabled {
            return Ok(BTreeMap::new());
        }
        let algorithms = options
            .algorithms
            .clone()
            .unwrap_or_else(|| self.config.algorithms_for(kind));
        Ok(checksum::digest(data_path, &algorithms)?.into_names())
    }

    /// Remove the entry for `url`. Absent entries are not an error.
    pub fn delete(&self, url: &str) -> bool {
        match self.try_delete(url) {
            Ok(_) => true,
            Err(e) => {
                self.logger.error(&format!("Failed to delete {}: {}", url, e));
                false
            }
        }
    }

    /// Remove the entry for `url`, returning the bytes freed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if an existing artifact cannot be removed.
    pub fn try_delete(&self, url: &str) -> Result<u64, CacheError> {
        let entry = self.entry_for(url);
        let freed = self.evict(&entry)?;
        self.logger
            .cache_operation(CacheOp::Delete, entry.key.as_str(), url);
        Ok(freed)
    }

    /// Remove both artifacts of `entry`, tolerating partial absence.
    ///
    /// Returns the size of the data artifact immediately before deletion.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if an existing artifact cannot be removed.
    pub fn evict(&self, entry: &CacheEntry) -> Result<u64, CacheError> {
        let freed = entry.data_len();
        remove_file_tolerant(&entry.data_path)?;
        remove_file_tolerant(&entry.meta_path)?;
        Ok(freed)
    }

    /// Remove every entry in the store.
    pub fn clear(&self) -> bool {
        match self.try_clear() {
            Ok(_) => true,
            Err(e) => {
                self.logger
                    .error(&format!("Failed to clear {}: {}", self.dir.display(), e));
                false
            }
        }
    }

    /// Remove every entry, leftover temporary file and idle lock file,
    /// returning how many files were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be listed or a
    /// file cannot be removed.
    pub fn try_clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.list_files()? {
            if is_store_file(&path) {
                remove_file_tolerant(&path)?;
                removed += 1;
            }
        }
        removed += self.reclaim_locks(false);
        self.logger.cache_operation(
            CacheOp::Clear,
            &self.dir.display().to_string(),
            &format!("{} files removed", removed),
        );
        Ok(removed)
    }

    /// Remove lock files nobody holds, returning how many were removed.
    ///
    /// With `only_stale`, locks whose key still has an artifact on disk are
    /// kept. Failures are logged and skipped.
    pub fn reclaim_locks(&self, only_stale: bool) -> usize {
        let names = match lock::lock_names(&self.dir) {
            Ok(names) => names,
            Err(e) => {
                self.logger
                    .warn(&format!("Cannot list locks in {}: {}", self.dir.display(), e));
                return 0;
            }
        };
        let mut removed = 0;
        for name in names {
            if only_stale {
                if let Some(key) = CacheKey::parse(&name) {
                    let entry = CacheEntry::locate(&self.dir, key);
                    if entry.data_path.exists() || entry.meta_path.exists() {
                        continue;
                    }
                }
            }
            match lock::remove_idle(&self.dir, &name) {
                Ok(true) => removed += 1,
                Ok(false) => self.logger.debug(&format!("Lock {} is held", name)),
                Err(e) => self
                    .logger
                    .warn(&format!("Failed to remove lock {}: {}", name, e)),
            }
        }
        removed
    }

    /// Entry count and disk usage.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        let files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                self.logger.debug(&e.to_string());
                return stats;
            }
        };
        for path in files {
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some(META_EXTENSION) {
                stats.count += 1;
            }
            if matches!(ext, Some(DATA_EXTENSION) | Some(META_EXTENSION)) {
                stats.total_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            }
        }
        stats
    }

    /// Every entry that has a metadata record, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be listed.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries: Vec<CacheEntry> = self
            .list_files()?
            .into_iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(META_EXTENSION))
            .filter_map(|p| key_of(&p))
            .map(|key| CacheEntry::locate(&self.dir, key))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Data artifacts without a metadata record, plus leftover temporary
    /// metadata files.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be listed.
    pub fn orphans(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut orphans: Vec<PathBuf> = self
            .list_files()?
            .into_iter()
            .filter(|p| match p.extension().and_then(|e| e.to_str()) {
                Some(DATA_EXTENSION) => {
                    key_of(p).is_some() && !p.with_extension(META_EXTENSION).exists()
                }
                Some("tmp") => true,
                _ => false,
            })
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    fn list_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };
        let mut files = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| CacheError::io(&self.dir, e))?;
            if item.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(item.path());
            }
        }
        Ok(files)
    }
}

fn key_of(path: &Path) -> Option<CacheKey> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(CacheKey::parse)
}

fn is_store_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(DATA_EXTENSION) | Some(META_EXTENSION) | Some("tmp")
    )
}

fn remove_file_tolerant(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = remove_file_tolerant(path) {
        log::warn!("Failed to roll back {}: {}", path.display(), e);
    }
}

/// Copy `source` into a freshly created data artifact, returning the bytes
/// written. The artifact never inherits the source's permissions.
fn copy_artifact(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut reader = fs::File::open(source)?;
    match fs::remove_file(dest) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    let mut writer = fs::File::create(dest)?;
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    Ok(copied)
}

/// Record an access on the data artifact for LRU ordering. Best effort.
fn touch_access(path: &Path) {
    let result = fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_times(FileTimes::new().set_accessed(SystemTime::now())));
    if let Err(e) = result {
        log::trace!("Could not update access time of {}: {}", path.display(), e);
    }
}
