//! Structural validation of downloaded artifacts.
//!
//! # Overview
//!
//! Network fetches from third-party mirrors fail in two characteristic ways:
//! truncated transfers and substituted error pages. Both are detectable from
//! a file's header or first few hundred bytes, so the [`Validator`] checks
//! every artifact before it is admitted to (or served from) the cache.
//!
//! Dispatch is by [`FileKind`], inferred from the file name:
//!
//! | Kind | Rule |
//! |------|------|
//! | `Gzip` | starts with `1F 8B`; optional compressed/decompressed size floors |
//! | `Bzip2` | starts with `BZh` |
//! | `Xz` | starts with `FD 37 7A 58 5A 00` |
//! | `Tar` | `ustar` at byte offset 257 |
//! | `Zip` | starts with `PK` |
//! | `Phar` | starts with `#!`, `<?php`, or `PK` |
//! | `Json` | parses as a JSON document |
//! | `Generic` | first 512 bytes contain no HTML or error-page markers |
//!
//! Zero-length files always fail.
//!
//! # Example
//!
//! ```no_run
//! use dlcache::validate::Validator;
//! use std::path::Path;
//!
//! let validator = Validator::default();
//! if !validator.validate(Path::new("downloads/php-8.3.0.tar.gz")) {
//!     eprintln!("download looks broken");
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::checksum::Algorithm;

/// Number of leading bytes inspected by the generic error-page heuristic.
pub const GENERIC_PREFIX_LEN: usize = 512;

/// Default ceiling on compressed size for full gzip decompression (64 MiB).
pub const DEFAULT_MAX_DECOMPRESS_SIZE: u64 = 64 * 1024 * 1024;

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const ZIP_MAGIC: &[u8] = b"PK";
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Lowercased markers of an HTML document.
const HTML_MARKERS: &[&str] = &["<html", "<!doctype html>"];

/// Lowercased tokens typical of an error page saved in place of a binary.
const ERROR_TOKENS: &[&str] = &["not found", "404", "forbidden", "access denied", "error"];

/// Category of file, used to select validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Gzip stream (`.gz`, `.tgz`, `.tar.gz`)
    Gzip,
    /// Bzip2 stream (`.bz2`, `.tbz2`, `.tar.bz2`)
    Bzip2,
    /// Xz stream (`.xz`, `.txz`, `.tar.xz`)
    Xz,
    /// Uncompressed POSIX tar archive
    Tar,
    /// Zip archive
    Zip,
    /// Self-executing archive bundle
    Phar,
    /// JSON document (release indexes, cache metadata)
    Json,
    /// Anything else
    Generic,
}

impl FileKind {
    /// Every kind, in rule-table order.
    pub const ALL: [FileKind; 8] = [
        FileKind::Gzip,
        FileKind::Bzip2,
        FileKind::Xz,
        FileKind::Tar,
        FileKind::Zip,
        FileKind::Phar,
        FileKind::Json,
        FileKind::Generic,
    ];

    /// Infer the kind from a file name or URL path.
    ///
    /// Query strings and fragments are ignored so URLs can be passed directly.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let name = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .trim_end_matches('/')
            .to_ascii_lowercase();
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name.as_str());

        let Some((_, ext)) = base.rsplit_once('.') else {
            return Self::Generic;
        };
        match ext {
            "gz" | "tgz" => Self::Gzip,
            "bz2" | "tbz2" | "tbz" => Self::Bzip2,
            "xz" | "txz" => Self::Xz,
            "tar" => Self::Tar,
            "zip" => Self::Zip,
            "phar" => Self::Phar,
            "json" => Self::Json,
            _ => Self::Generic,
        }
    }

    /// Infer the kind from a path's file name.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        path.file_name()
            .map(|n| Self::from_name(&n.to_string_lossy()))
            .unwrap_or(Self::Generic)
    }

    /// Lowercase name used in configuration and reports.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::Phar => "phar",
            Self::Json => "json",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size bounds and preferred checksums for one [`FileKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindRules {
    /// Reject files smaller than this many bytes.
    pub min_size: Option<u64>,
    /// Reject files larger than this many bytes.
    pub max_size: Option<u64>,
    /// Gzip only: reject archives that decompress to fewer bytes.
    pub min_decompressed_size: Option<u64>,
    /// Gzip only: skip full decompression for archives larger than this.
    pub max_decompress_size: u64,
    /// Checksums computed at admission for this kind (empty = store default).
    pub algorithms: Vec<Algorithm>,
}

impl Default for KindRules {
    fn default() -> Self {
        Self {
            min_size: None,
            max_size: None,
            min_decompressed_size: None,
            max_decompress_size: DEFAULT_MAX_DECOMPRESS_SIZE,
            algorithms: Vec::new(),
        }
    }
}

/// Reasons a file fails structural validation.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    /// The file does not exist.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// The path is not a regular file.
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    /// The file has zero length.
    #[error("empty file")]
    Empty,

    /// The file is below the configured minimum size for its kind.
    #[error("{kind} file too small: {size} bytes (minimum {min})")]
    TooSmall {
        /// Kind whose rule failed
        kind: FileKind,
        /// Actual size
        size: u64,
        /// Configured minimum
        min: u64,
    },

    /// The file is above the configured maximum size for its kind.
    #[error("{kind} file too large: {size} bytes (maximum {max})")]
    TooLarge {
        /// Kind whose rule failed
        kind: FileKind,
        /// Actual size
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// The header does not carry the expected signature.
    #[error("bad {kind} signature")]
    BadMagic {
        /// Kind whose signature was expected
        kind: FileKind,
    },

    /// The archive could not be decompressed to the end.
    #[error("corrupt {kind} stream: {message}")]
    CorruptArchive {
        /// Kind of archive
        kind: FileKind,
        /// Decoder error message
        message: String,
    },

    /// The archive decompresses to suspiciously little data.
    #[error("archive decompresses to {size} bytes (minimum {min})")]
    TooSmallDecompressed {
        /// Decompressed size
        size: u64,
        /// Configured minimum
        min: u64,
    },

    /// The content looks like an HTML document or error page.
    #[error("content looks like an error page (matched '{marker}')")]
    ErrorPage {
        /// Marker that matched
        marker: &'static str,
    },

    /// The document does not parse as JSON.
    #[error("invalid JSON document: {0}")]
    InvalidJson(String),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path being validated
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Header and content heuristics for downloaded artifacts.
///
/// Stateless apart from its rule table; cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: BTreeMap<FileKind, KindRules>,
}

impl Validator {
    /// Create a validator with per-kind rules.
    ///
    /// Kinds missing from `rules` use [`KindRules::default`].
    #[must_use]
    pub fn new(rules: BTreeMap<FileKind, KindRules>) -> Self {
        Self { rules }
    }

    /// Rules applied to `kind`.
    #[must_use]
    pub fn rules_for(&self, kind: FileKind) -> KindRules {
        self.rules.get(&kind).cloned().unwrap_or_default()
    }

    /// Return `true` if the file passes the checks for its inferred kind.
    #[must_use]
    pub fn validate(&self, path: &Path) -> bool {
        self.inspect(path).is_ok()
    }

    /// Validate a file, inferring its kind from its own name.
    ///
    /// # Errors
    ///
    /// Returns the first rule the file violates.
    pub fn inspect(&self, path: &Path) -> Result<FileKind, ValidationError> {
        self.inspect_as(path, FileKind::from_path(path))
    }

    /// Validate a file against the rules of an explicit kind.
    ///
    /// Used for cache data artifacts, whose stored name does not carry the
    /// original extension.
    ///
    /// # Errors
    ///
    /// Returns the first rule the file violates.
    pub fn inspect_as(&self, path: &Path, kind: FileKind) -> Result<FileKind, ValidationError> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ValidationError::NotFound(path.to_path_buf()),
            _ => ValidationError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        if !metadata.is_file() {
            return Err(ValidationError::NotAFile(path.to_path_buf()));
        }

        let size = metadata.len();
        if size == 0 {
            return Err(ValidationError::Empty);
        }

        let rules = self.rules_for(kind);
        if let Some(min) = rules.min_size {
            if size < min {
                return Err(ValidationError::TooSmall { kind, size, min });
            }
        }
        if let Some(max) = rules.max_size {
            if size > max {
                return Err(ValidationError::TooLarge { kind, size, max });
            }
        }

        match kind {
            FileKind::Gzip => {
                expect_prefix(path, kind, GZIP_MAGIC)?;
                if let Some(min) = rules.min_decompressed_size {
                    if size <= rules.max_decompress_size {
                        check_decompressed_size(path, min)?;
                    } else {
                        log::debug!(
                            "Skipping full decompression of {} ({} bytes)",
                            path.display(),
                            size
                        );
                    }
                }
            }
            FileKind::Bzip2 => expect_prefix(path, kind, BZIP2_MAGIC)?,
            FileKind::Xz => expect_prefix(path, kind, XZ_MAGIC)?,
            FileKind::Zip => expect_prefix(path, kind, ZIP_MAGIC)?,
            FileKind::Tar => {
                let header = read_prefix(path, TAR_MAGIC_OFFSET + TAR_MAGIC.len())?;
                if header.get(TAR_MAGIC_OFFSET..) != Some(TAR_MAGIC) {
                    return Err(ValidationError::BadMagic { kind });
                }
            }
            FileKind::Phar => {
                let head = read_prefix(path, 5)?;
                let ok = head.starts_with(b"#!")
                    || head.starts_with(ZIP_MAGIC)
                    || head.eq_ignore_ascii_case(b"<?php");
                if !ok {
                    return Err(ValidationError::BadMagic { kind });
                }
            }
            FileKind::Json => {
                let file = open(path)?;
                serde_json::from_reader::<_, serde::de::IgnoredAny>(BufReader::new(file))
                    .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
            }
            FileKind::Generic => {
                let head = read_prefix(path, GENERIC_PREFIX_LEN)?;
                if let Some(marker) = error_page_marker(&head) {
                    return Err(ValidationError::ErrorPage { marker });
                }
            }
        }

        Ok(kind)
    }
}

/// Return the first HTML or error-page marker found in `head`, if any.
#[must_use]
pub fn error_page_marker(head: &[u8]) -> Option<&'static str> {
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    HTML_MARKERS
        .iter()
        .chain(ERROR_TOKENS)
        .find(|marker| text.contains(*marker))
        .copied()
}

fn open(path: &Path) -> Result<File, ValidationError> {
    File::open(path).map_err(|e| ValidationError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read up to `len` leading bytes; shorter files yield shorter buffers.
fn read_prefix(path: &Path, len: usize) -> Result<Vec<u8>, ValidationError> {
    let mut buf = Vec::with_capacity(len);
    open(path)?
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| ValidationError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(buf)
}

fn expect_prefix(path: &Path, kind: FileKind, magic: &[u8]) -> Result<(), ValidationError> {
    let head = read_prefix(path, magic.len())?;
    if head == magic {
        Ok(())
    } else {
        Err(ValidationError::BadMagic { kind })
    }
}

fn check_decompressed_size(path: &Path, min: u64) -> Result<(), ValidationError> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(open(path)?));
    let size = io::copy(&mut decoder, &mut io::sink()).map_err(|e| {
        ValidationError::CorruptArchive {
            kind: FileKind::Gzip,
            message: e.to_string(),
        }
    })?;
    if size < min {
        return Err(ValidationError::TooSmallDecompressed { size, min });
    }
    Ok(())
}
