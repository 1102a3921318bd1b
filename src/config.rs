//! Application configuration management.
//!
//! Configuration is layered with figment, lowest priority first:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. TOML file (platform config dir, or `--config PATH`)
//! 3. Environment variables prefixed `DLCACHE_`, nested with `__`
//!    (e.g. `DLCACHE_INTEGRITY__VERIFY_ON_HIT=false`)
//! 4. CLI flags, applied by the caller after loading
//!
//! # Example file
//!
//! ```toml
//! ttl_secs = 604800
//! max_size = 2147483648
//!
//! [integrity]
//! algorithms = ["sha256", "crc32"]
//!
//! [cleanup]
//! strategy = "lru"
//! keep_recent = 5
//!
//! [file_types.gzip]
//! min_size = 1048576
//! min_decompressed_size = 10485760
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::checksum::Algorithm;
use crate::validate::{FileKind, KindRules};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "DLCACHE_";

/// Seven days.
pub const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Two GiB.
pub const DEFAULT_MAX_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// One day.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Errors loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A layer could not be read or did not match the schema.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The merged configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The configuration file could not be written.
    #[error("failed to write configuration to {path}: {message}")]
    Write {
        /// Destination
        path: PathBuf,
        /// What went wrong
        message: String,
    },
}

/// Order in which valid entries are pruned when the store exceeds its size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CleanupStrategy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Largest first
    Size,
    /// Oldest admission first
    Age,
}

/// Integrity checking options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Master switch for size/checksum/structure checks.
    pub enabled: bool,
    /// Algorithms computed at admission when the caller supplies none.
    pub algorithms: Vec<Algorithm>,
    /// Re-verify entries on every `get`.
    pub verify_on_hit: bool,
    /// Verify caller-supplied checksums against the source file on `set`.
    pub verify_on_set: bool,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithms: vec![Algorithm::Sha256],
            verify_on_hit: true,
            verify_on_set: true,
        }
    }
}

/// Size-bounded cleanup options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Pruning order.
    pub strategy: CleanupStrategy,
    /// Never prune this many most recently admitted entries.
    pub keep_recent: usize,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache root. Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// When false, lookups always miss and admissions are refused.
    pub enabled: bool,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Per-namespace size cap in bytes (0 = unlimited).
    pub max_size: u64,
    /// Run sweep + prune automatically when the interval has elapsed.
    pub auto_cleanup: bool,
    /// Minimum seconds between automatic cleanups.
    pub cleanup_interval_secs: u64,
    /// Take an advisory lock around admissions.
    pub file_lock: bool,
    /// Integrity checking options.
    pub integrity: IntegrityConfig,
    /// Size-bounded cleanup options.
    pub cleanup: CleanupConfig,
    /// Per-file-type size bounds and preferred algorithms.
    pub file_types: BTreeMap<FileKind, KindRules>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            enabled: true,
            ttl_secs: DEFAULT_TTL_SECS,
            max_size: DEFAULT_MAX_SIZE,
            auto_cleanup: false,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            file_lock: true,
            integrity: IntegrityConfig::default(),
            cleanup: CleanupConfig::default(),
            file_types: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load the layered configuration.
    ///
    /// `path` overrides the default platform config file. A missing file is
    /// not an error; a malformed one is.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a layer fails to parse and
    /// [`ConfigError::Invalid`] if the merged result fails [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.map(Path::to_path_buf).or_else(Self::config_path);

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = &file {
            log::debug!("Reading configuration from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.integrity.enabled && self.integrity.algorithms.is_empty() {
            return Err(ConfigError::Invalid(
                "integrity.algorithms must not be empty when integrity checking is enabled"
                    .to_string(),
            ));
        }
        if self.auto_cleanup && self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cleanup_interval_secs must be positive when auto_cleanup is enabled".to_string(),
            ));
        }
        for (kind, rules) in &self.file_types {
            if let (Some(min), Some(max)) = (rules.min_size, rules.max_size) {
                if min > max {
                    return Err(ConfigError::Invalid(format!(
                        "file_types.{}: min_size ({}) exceeds max_size ({})",
                        kind, min, max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolved cache root.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        ProjectDirs::from("com", "dlcache", "dlcache")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".dlcache"))
    }

    /// Checksum algorithms to compute for a file of `kind`.
    #[must_use]
    pub fn algorithms_for(&self, kind: FileKind) -> Vec<Algorithm> {
        match self.file_types.get(&kind) {
            Some(rules) if !rules.algorithms.is_empty() => rules.algorithms.clone(),
            _ => self.integrity.algorithms.clone(),
        }
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Write {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Save as TOML to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] on serialization or I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |message: String| ConfigError::Write {
            path: path.to_path_buf(),
            message,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let content = self.to_toml()?;
        fs::write(path, content).map_err(|e| write_err(e.to_string()))
    }

    /// Default platform-specific configuration path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "dlcache", "dlcache")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
