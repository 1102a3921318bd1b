//! Cache entry definitions.
//!
//! An entry is two co-located files sharing a key-derived base name: the
//! data artifact (`<key>.data`) and the metadata record (`<key>.json`).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::key::CacheKey;

/// Current schema tag written into every metadata record.
pub const CACHE_VERSION: &str = "1.0";

/// File extension of data artifacts.
pub const DATA_EXTENSION: &str = "data";

/// File extension of metadata records.
pub const META_EXTENSION: &str = "json";

/// Persisted description of a cached artifact.
///
/// Every field except `checksums` and `original_path` is required; a record
/// missing one of them fails to deserialize and the entry is treated as
/// corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Exact source identifier the key was derived from.
    pub url: String,
    /// Admission timestamp, seconds since the Unix epoch.
    pub time: u64,
    /// Expected byte length of the data artifact.
    pub size: u64,
    /// Algorithm name to hex digest. May be empty.
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    /// Path the data was copied from (informational).
    #[serde(default)]
    pub original_path: String,
    /// Schema tag.
    pub cache_version: String,
}

/// Errors reading or writing a metadata record.
#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    /// The record could not be read or written.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Record path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The record is not a well-formed metadata document.
    #[error("malformed metadata in {path}: {source}")]
    Parse {
        /// Record path
        path: PathBuf,
        /// The underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// The record parsed but its contents are unusable.
    #[error("invalid metadata in {path}: {reason}")]
    Invalid {
        /// Record path
        path: PathBuf,
        /// What is wrong
        reason: String,
    },
}

impl CacheMetadata {
    /// Create a record for a freshly admitted artifact.
    #[must_use]
    pub fn new(
        url: &str,
        time: u64,
        size: u64,
        checksums: BTreeMap<String, String>,
        original_path: &Path,
    ) -> Self {
        Self {
            url: url.to_string(),
            time,
            size,
            checksums,
            original_path: original_path.to_string_lossy().into_owned(),
            cache_version: CACHE_VERSION.to_string(),
        }
    }

    /// Whether the record is older than `ttl_secs` at `now`.
    ///
    /// Evaluated as `now - time > ttl`; a timestamp in the future is never
    /// expired.
    #[must_use]
    pub fn is_expired(&self, now: u64, ttl_secs: u64) -> bool {
        now.saturating_sub(self.time) > ttl_secs
    }

    /// Read and validate a record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] if the file cannot be read,
    /// [`MetadataError::Parse`] for malformed or wrong-typed fields, and
    /// [`MetadataError::Invalid`] for an empty URL or unknown schema tag.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = fs::read(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let metadata: Self =
            serde_json::from_slice(&content).map_err(|source| MetadataError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let invalid = |reason: String| MetadataError::Invalid {
            path: path.to_path_buf(),
            reason,
        };
        if metadata.url.is_empty() {
            return Err(invalid("empty url".to_string()));
        }
        if metadata.cache_version != CACHE_VERSION {
            return Err(invalid(format!(
                "unsupported cache_version {:?}",
                metadata.cache_version
            )));
        }
        Ok(metadata)
    }

    /// Write the record, replacing any existing one atomically.
    ///
    /// The document is written to a sibling temporary file and renamed into
    /// place so readers never observe a half-written record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] if writing or renaming fails.
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let io_err = |source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_vec_pretty(self).map_err(|source| MetadataError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension(format!("{}.tmp", META_EXTENSION));
        let result = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&json)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, path));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }
}

/// A cache entry located on disk.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Entry key
    pub key: CacheKey,
    /// Path of the data artifact
    pub data_path: PathBuf,
    /// Path of the metadata record
    pub meta_path: PathBuf,
}

impl CacheEntry {
    /// Locate the entry for `key` under a namespace directory.
    #[must_use]
    pub fn locate(dir: &Path, key: CacheKey) -> Self {
        let data_path = dir.join(format!("{}.{}", key, DATA_EXTENSION));
        let meta_path = dir.join(format!("{}.{}", key, META_EXTENSION));
        Self {
            key,
            data_path,
            meta_path,
        }
    }

    /// Both artifacts exist.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.data_path.is_file() && self.meta_path.is_file()
    }

    /// Current size of the data artifact, or 0 if it is missing.
    #[must_use]
    pub fn data_len(&self) -> u64 {
        fs::metadata(&self.data_path).map(|m| m.len()).unwrap_or(0)
    }

    /// Read this entry's metadata record.
    ///
    /// # Errors
    ///
    /// See [`CacheMetadata::load`].
    pub fn metadata(&self) -> Result<CacheMetadata, MetadataError> {
        CacheMetadata::load(&self.meta_path)
    }
}
