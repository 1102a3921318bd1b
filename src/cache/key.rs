//! URL-derived cache keys.

use std::fmt;

use crate::checksum::{digest_bytes, Algorithm};

/// Lookup identifier for a cache entry: the MD5 of the source URL.
///
/// Keys are never derived from content; two different URLs serving the same
/// bytes occupy two entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a source URL. The URL is used verbatim.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self(digest_bytes(Algorithm::Md5, url.as_bytes()))
    }

    /// Accept an existing key string (e.g. a file stem found on disk).
    ///
    /// Returns `None` unless `s` is 32 lowercase hex characters.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 32 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    /// The hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
