//! Expiry and corruption sweeping for cache stores.
//!
//! # Overview
//!
//! A [`Sweeper`] walks every metadata record of one [`CacheStore`] and
//! classifies each entry:
//!
//! 1. unreadable metadata, or metadata not matching its key → corrupted
//! 2. older than the TTL → expired
//! 3. data artifact missing, of the wrong length, or structurally invalid → corrupted
//!
//! Expired and corrupted entries are both evicted; only the counters differ.
//! Data artifacts without a metadata record (left behind by interrupted or
//! racing admissions) and stale temporary files are reclaimed as corrupted.
//!
//! A sweep never fails: per-entry I/O errors classify the entry as corrupted,
//! so repeated sweeps converge on a clean store.
//!
//! [`Sweeper::prune`] additionally enforces a size cap by evicting valid
//! entries in [`CleanupStrategy`] order.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fs;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::cache::{CacheEntry, CacheKey, CacheMetadata, CacheStore};
use crate::config::CleanupStrategy;
use crate::logging::{CacheLogger, CacheOp};

/// Aggregate results of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Entries examined (including orphaned files).
    pub checked: usize,
    /// Entries evicted because they outlived the TTL.
    pub expired_removed: usize,
    /// Entries evicted because they were unreadable or invalid.
    pub corrupted_removed: usize,
    /// Sum of data artifact sizes removed.
    pub bytes_freed: u64,
}

impl SweepStats {
    /// Total entries evicted.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.expired_removed + self.corrupted_removed
    }

    /// Add another sweep's counters to this one.
    pub fn merge(&mut self, other: &SweepStats) {
        self.checked += other.checked;
        self.expired_removed += other.expired_removed;
        self.corrupted_removed += other.corrupted_removed;
        self.bytes_freed += other.bytes_freed;
    }
}

/// Aggregate results of one size-bounded prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    /// Valid entries considered.
    pub checked: usize,
    /// Entries evicted to get under the cap.
    pub removed: usize,
    /// Sum of data artifact sizes removed.
    pub bytes_freed: u64,
    /// Data bytes remaining afterwards.
    pub remaining_bytes: u64,
}

impl PruneStats {
    /// Add another prune's counters to this one.
    pub fn merge(&mut self, other: &PruneStats) {
        self.checked += other.checked;
        self.removed += other.removed;
        self.bytes_freed += other.bytes_freed;
        self.remaining_bytes += other.remaining_bytes;
    }
}

/// Classification of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Keep.
    Valid,
    /// Outlived the TTL.
    Expired,
    /// Unusable, with a reason for the log.
    Corrupted(String),
}

/// Sweeps one store.
pub struct Sweeper<'a> {
    store: &'a CacheStore,
    logger: &'a dyn CacheLogger,
}

impl<'a> Sweeper<'a> {
    /// Create a sweeper reporting through the store's logger.
    #[must_use]
    pub fn new(store: &'a CacheStore) -> Self {
        Self {
            store,
            logger: store.logger(),
        }
    }

    /// Report through a different logger.
    #[must_use]
    pub fn with_logger(mut self, logger: &'a dyn CacheLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Classify one entry without modifying it.
    #[must_use]
    pub fn classify(&self, entry: &CacheEntry) -> Disposition {
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => return Disposition::Corrupted(e.to_string()),
        };
        if CacheKey::from_url(&metadata.url) != entry.key {
            return Disposition::Corrupted("url does not match key".to_string());
        }
        if metadata.is_expired(self.store.now(), self.store.config().ttl_secs) {
            return Disposition::Expired;
        }
        let data_len = match fs::metadata(&entry.data_path) {
            Ok(m) if m.is_file() => m.len(),
            Ok(_) => return Disposition::Corrupted("data artifact is not a file".to_string()),
            Err(e) => return Disposition::Corrupted(format!("data artifact: {}", e)),
        };
        if data_len != metadata.size {
            return Disposition::Corrupted(format!(
                "size mismatch ({} != {})",
                data_len, metadata.size
            ));
        }
        let kind = CacheStore::kind_for(&metadata.url, &metadata.original_path);
        match self.store.validator().inspect_as(&entry.data_path, kind) {
            Ok(_) => Disposition::Valid,
            Err(e) => Disposition::Corrupted(e.to_string()),
        }
    }

    /// Evict every expired or corrupted entry and return the counts.
    pub fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                self.logger.warn(&format!("Sweep skipped: {}", e));
                return stats;
            }
        };

        for entry in entries {
            stats.checked += 1;
            let disposition = self.classify(&entry);
            let reason = match &disposition {
                Disposition::Valid => continue,
                Disposition::Expired => "expired".to_string(),
                Disposition::Corrupted(reason) => format!("corrupted: {}", reason),
            };

            let freed = entry.data_len();
            match self.store.evict(&entry) {
                Ok(_) => {
                    stats.bytes_freed += freed;
                    if disposition == Disposition::Expired {
                        stats.expired_removed += 1;
                    } else {
                        stats.corrupted_removed += 1;
                    }
                    self.logger
                        .cache_operation(CacheOp::Delete, entry.key.as_str(), &reason);
                }
                Err(e) => self
                    .logger
                    .warn(&format!("Failed to evict {}: {}", entry.key, e)),
            }
        }

        match self.store.orphans() {
            Ok(orphans) => {
                for path in orphans {
                    stats.checked += 1;
                    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    match fs::remove_file(&path) {
                        Ok(()) => {
                            stats.corrupted_removed += 1;
                            stats.bytes_freed += size;
                            self.logger.cache_operation(
                                CacheOp::Delete,
                                &path.display().to_string(),
                                "orphaned file",
                            );
                        }
                        Err(e) => self
                            .logger
                            .warn(&format!("Failed to remove {}: {}", path.display(), e)),
                    }
                }
            }
            Err(e) => self.logger.warn(&format!("Orphan scan skipped: {}", e)),
        }

        let locks = self.store.reclaim_locks(true);
        if locks > 0 {
            self.logger
                .debug(&format!("Removed {} stale lock files", locks));
        }

        self.logger.info(&format!(
            "Sweep of {}: {} checked, {} expired, {} corrupted, {} bytes freed",
            self.store.dir().display(),
            stats.checked,
            stats.expired_removed,
            stats.corrupted_removed,
            stats.bytes_freed
        ));
        stats
    }

    /// Evict valid entries until the store's data is at most `max_size`
    /// bytes. A `max_size` of 0 means unlimited.
    ///
    /// Candidates are ordered by the configured [`CleanupStrategy`]; the
    /// configured `keep_recent` most recently admitted entries are never
    /// evicted, even if that leaves the store above the cap.
    pub fn prune(&self, max_size: u64) -> PruneStats {
        let cleanup = &self.store.config().cleanup;
        self.prune_with(max_size, cleanup.strategy, cleanup.keep_recent)
    }

    /// [`Sweeper::prune`] with an explicit strategy and floor.
    pub fn prune_with(
        &self,
        max_size: u64,
        strategy: CleanupStrategy,
        keep_recent: usize,
    ) -> PruneStats {
        let mut stats = PruneStats::default();

        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                self.logger.warn(&format!("Prune skipped: {}", e));
                return stats;
            }
        };

        let mut candidates: Vec<Candidate> = entries
            .into_iter()
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                Some(Candidate::new(entry, &metadata))
            })
            .collect();
        stats.checked = candidates.len();
        stats.remaining_bytes = candidates.iter().map(|c| c.size).sum();

        if max_size == 0 || stats.remaining_bytes <= max_size {
            return stats;
        }

        let mut by_recency: Vec<&Candidate> = candidates.iter().collect();
        by_recency.sort_by_key(|c| (Reverse(c.admitted), c.entry.key.clone()));
        let protected: HashSet<CacheKey> = by_recency
            .into_iter()
            .take(keep_recent)
            .map(|c| c.entry.key.clone())
            .collect();

        match strategy {
            CleanupStrategy::Lru => {
                candidates.sort_by_key(|c| (c.accessed, c.entry.key.clone()));
            }
            CleanupStrategy::Age => {
                candidates.sort_by_key(|c| (c.admitted, c.entry.key.clone()));
            }
            CleanupStrategy::Size => {
                candidates.sort_by_key(|c| (Reverse(c.size), c.entry.key.clone()));
            }
        }

        for candidate in candidates {
            if stats.remaining_bytes <= max_size {
                break;
            }
            if protected.contains(&candidate.entry.key) {
                continue;
            }
            match self.store.evict(&candidate.entry) {
                Ok(freed) => {
                    stats.removed += 1;
                    stats.bytes_freed += freed;
                    stats.remaining_bytes = stats.remaining_bytes.saturating_sub(candidate.size);
                    self.logger.cache_operation(
                        CacheOp::Delete,
                        candidate.entry.key.as_str(),
                        "pruned to fit size limit",
                    );
                }
                Err(e) => self
                    .logger
                    .warn(&format!("Failed to evict {}: {}", candidate.entry.key, e)),
            }
        }

        if stats.remaining_bytes > max_size {
            self.logger.warn(&format!(
                "{} still holds {} bytes (limit {}) after pruning",
                self.store.dir().display(),
                stats.remaining_bytes,
                max_size
            ));
        }
        stats
    }
}

struct Candidate {
    entry: CacheEntry,
    size: u64,
    admitted: u64,
    accessed: u64,
}

impl Candidate {
    fn new(entry: CacheEntry, metadata: &CacheMetadata) -> Self {
        let fs_meta = fs::metadata(&entry.data_path).ok();
        let size = fs_meta.as_ref().map(|m| m.len()).unwrap_or(0);
        let accessed = fs_meta
            .and_then(|m| m.accessed().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(metadata.time);
        Self {
            entry,
            size,
            admitted: metadata.time,
            accessed,
        }
    }
}
