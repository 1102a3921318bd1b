//! The cache root: one [`CacheStore`] per namespace plus scheduled cleanup.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::store::{CacheStore, StoreStats};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::logging::{CacheLogger, LogCacheLogger};
use crate::sweep::{PruneStats, SweepStats, Sweeper};

/// Stamp file in the cache root holding the time of the last cleanup.
pub const CLEANUP_STAMP: &str = ".last_cleanup";

/// Logical sub-store of the cache root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Release and version index documents
    Versions,
    /// Extension index documents
    Extensions,
    /// Downloaded artifacts (source archives, packages)
    #[default]
    Downloads,
}

impl Namespace {
    /// Every namespace, in directory order.
    pub const ALL: [Namespace; 3] = [Self::Versions, Self::Extensions, Self::Downloads];

    /// Subdirectory name under the cache root.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Versions => "versions",
            Self::Extensions => "extensions",
            Self::Downloads => "downloads",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Versions => 0,
            Self::Extensions => 1,
            Self::Downloads => 2,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Totals of one [`CacheManager::cleanup`] run across all namespaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Expiry and corruption sweep.
    pub sweep: SweepStats,
    /// Size-bounded prune that followed.
    pub prune: PruneStats,
}

/// Owns the cache root and one store per [`Namespace`].
pub struct CacheManager {
    root: PathBuf,
    config: Config,
    stores: Vec<CacheStore>,
    logger: Arc<dyn CacheLogger>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("root", &self.root)
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Create a manager rooted at the configured cache directory.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let mut manager = Self {
            root: config.cache_root(),
            config: config.clone(),
            stores: Vec::new(),
            logger: Arc::new(LogCacheLogger),
            clock: Arc::new(SystemClock),
        };
        manager.rebuild_stores();
        manager
    }

    /// Report through `logger` in every store.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn CacheLogger>) -> Self {
        self.logger = logger;
        self.rebuild_stores();
        self
    }

    /// Read time from `clock` in every store.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.rebuild_stores();
        self
    }

    fn rebuild_stores(&mut self) {
        self.stores = Namespace::ALL
            .iter()
            .map(|ns| {
                CacheStore::new(&self.root.join(ns.dir_name()), &self.config)
                    .with_logger(Arc::clone(&self.logger))
                    .with_clock(Arc::clone(&self.clock))
            })
            .collect();
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store for `namespace`.
    #[must_use]
    pub fn store(&self, namespace: Namespace) -> &CacheStore {
        &self.stores[namespace.index()]
    }

    /// Per-namespace entry counts and disk usage.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<Namespace, StoreStats> {
        Namespace::ALL
            .iter()
            .map(|&ns| (ns, self.store(ns).stats()))
            .collect()
    }

    /// Empty every namespace. Returns false if any store failed to clear.
    pub fn clear_all(&self) -> bool {
        Namespace::ALL
            .iter()
            .fold(true, |ok, &ns| self.store(ns).clear() && ok)
    }

    /// Sweep every namespace.
    pub fn sweep_all(&self) -> BTreeMap<Namespace, SweepStats> {
        Namespace::ALL
            .iter()
            .map(|&ns| (ns, Sweeper::new(self.store(ns)).sweep()))
            .collect()
    }

    /// Sweep then prune every namespace to `max_size`, and record the run in
    /// the cleanup stamp.
    pub fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for ns in Namespace::ALL {
            let sweeper = Sweeper::new(self.store(ns));
            report.sweep.merge(&sweeper.sweep());
            report.prune.merge(&sweeper.prune(self.config.max_size));
        }
        self.record_cleanup();
        self.logger.info(&format!(
            "Cleanup finished: {} expired, {} corrupted, {} pruned",
            report.sweep.expired_removed, report.sweep.corrupted_removed, report.prune.removed
        ));
        report
    }

    /// Run [`CacheManager::cleanup`] if automatic cleanup is enabled and the
    /// configured interval has elapsed since the last run.
    pub fn maybe_auto_cleanup(&self) -> Option<CleanupReport> {
        if !self.config.auto_cleanup {
            return None;
        }
        let now = self.clock.now();
        if let Some(last) = self.last_cleanup() {
            if now.saturating_sub(last) < self.config.cleanup_interval_secs {
                log::trace!("Auto cleanup not due (last run at {})", last);
                return None;
            }
        }
        Some(self.cleanup())
    }

    /// Time of the last recorded cleanup, if any.
    #[must_use]
    pub fn last_cleanup(&self) -> Option<u64> {
        fs::read_to_string(self.root.join(CLEANUP_STAMP))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn record_cleanup(&self) {
        let stamp = self.root.join(CLEANUP_STAMP);
        let result = fs::create_dir_all(&self.root)
            .and_then(|()| fs::write(&stamp, self.clock.now().to_string()));
        if let Err(e) = result {
            self.logger
                .warn(&format!("Failed to write {}: {}", stamp.display(), e));
        }
    }
}
