//! Streaming checksum computation and verification.
//!
//! # Overview
//!
//! This module computes digests for files with one or more [`Algorithm`]s in
//! a single streaming pass and compares them against expected values.
//!
//! Two classes of algorithm are supported so callers can trade CPU cost
//! against confidence:
//! - [`Algorithm::Crc32`]: fast, non-cryptographic (catches truncation and bit rot)
//! - [`Algorithm::Sha256`] / [`Algorithm::Blake3`]: collision-resistant
//! - [`Algorithm::Md5`]: kept for mirrors that only publish MD5 sums
//!
//! # Example
//!
//! ```no_run
//! use dlcache::checksum::{digest, verify, Algorithm};
//! use std::path::Path;
//!
//! let path = Path::new("php-8.3.0.tar.gz");
//! let sums = digest(path, &[Algorithm::Sha256]).unwrap();
//! assert!(verify(path, &sums.into_names()).unwrap());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Read buffer size for streaming digests (64 KiB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// CRC-32 (IEEE), 8 hex characters.
    Crc32,
    /// MD5, 32 hex characters.
    Md5,
    /// SHA-256, 64 hex characters.
    Sha256,
    /// BLAKE3, 64 hex characters.
    Blake3,
}

impl Algorithm {
    /// All supported algorithms.
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Crc32,
        Algorithm::Md5,
        Algorithm::Sha256,
        Algorithm::Blake3,
    ];

    /// Canonical lowercase name, as stored in metadata records.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Crc32 => "crc32",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of the hex-encoded digest.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Crc32 => 8,
            Self::Md5 => 32,
            Self::Sha256 | Self::Blake3 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "crc32" | "crc" => Ok(Self::Crc32),
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" | "b3" => Ok(Self::Blake3),
            _ => Err(ChecksumError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Errors that can occur while computing checksums.
#[derive(thiserror::Error, Debug)]
pub enum ChecksumError {
    /// The algorithm name is not recognized.
    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The file could not be read.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path being digested
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Digests of one file, keyed by algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digests(BTreeMap<Algorithm, String>);

impl Digests {
    /// Hex digest for an algorithm, if computed.
    #[must_use]
    pub fn get(&self, algorithm: Algorithm) -> Option<&str> {
        self.0.get(&algorithm).map(String::as_str)
    }

    /// Number of digests held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no digest was computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(algorithm, hex)` pairs in algorithm order.
    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, &str)> {
        self.0.iter().map(|(a, h)| (*a, h.as_str()))
    }

    /// Convert into the name-keyed map persisted in metadata records.
    #[must_use]
    pub fn into_names(self) -> BTreeMap<String, String> {
        self.0
            .into_iter()
            .map(|(a, h)| (a.name().to_string(), h))
            .collect()
    }
}

/// One running hasher per requested algorithm.
enum Running {
    Crc32(crc32fast::Hasher),
    Md5(Md5),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Running {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Crc32 => Self::Crc32(crc32fast::Hasher::new()),
            Algorithm::Md5 => Self::Md5(Md5::new()),
            Algorithm::Sha256 => Self::Sha256(Sha256::new()),
            Algorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Crc32(h) => format!("{:08x}", h.finalize()),
            Self::Md5(h) => format!("{:x}", h.finalize()),
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Compute digests of `path` for every algorithm in `algorithms`.
///
/// The file is read once; duplicate algorithms are computed once.
///
/// # Errors
///
/// Returns [`ChecksumError::Io`] if the file cannot be opened or read.
pub fn digest(path: &Path, algorithms: &[Algorithm]) -> Result<Digests, ChecksumError> {
    let io_err = |source| ChecksumError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut wanted: Vec<Algorithm> = algorithms.to_vec();
    wanted.sort();
    wanted.dedup();

    let mut file = File::open(path).map_err(io_err)?;
    let mut running: Vec<(Algorithm, Running)> =
        wanted.iter().map(|&a| (a, Running::new(a))).collect();

    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(e)),
        };
        for (_, hasher) in &mut running {
            hasher.update(&buffer[..n]);
        }
    }

    Ok(Digests(
        running
            .into_iter()
            .map(|(a, h)| (a, h.finish()))
            .collect(),
    ))
}

/// Compute the digest of an in-memory byte slice.
#[must_use]
pub fn digest_bytes(algorithm: Algorithm, data: &[u8]) -> String {
    let mut hasher = Running::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

/// Verify `path` against every `(algorithm name, hex digest)` in `expected`.
///
/// Fails closed: an unknown algorithm name or any single mismatch makes the
/// whole check fail. An empty `expected` map verifies trivially; callers
/// that treat "no checksums" as "skip" should check for emptiness first.
///
/// # Errors
///
/// Returns [`ChecksumError::Io`] if the file cannot be read.
pub fn verify(path: &Path, expected: &BTreeMap<String, String>) -> Result<bool, ChecksumError> {
    let mut wanted: Vec<(Algorithm, &String)> = Vec::with_capacity(expected.len());
    for (name, hex) in expected {
        match name.parse::<Algorithm>() {
            Ok(algorithm) => wanted.push((algorithm, hex)),
            Err(_) => {
                log::debug!("Unknown checksum algorithm '{}', failing verification", name);
                return Ok(false);
            }
        }
    }

    let algorithms: Vec<Algorithm> = wanted.iter().map(|(algorithm, _)| *algorithm).collect();
    let actual = digest(path, &algorithms)?;
    for (algorithm, hex) in wanted {
        match actual.get(algorithm) {
            Some(computed) if computed.eq_ignore_ascii_case(hex.trim()) => {}
            _ => {
                log::debug!("{} mismatch for {}", algorithm, path.display());
                return Ok(false);
            }
        }
    }
    Ok(true)
}
