//! Logging infrastructure for dlcache.
//!
//! This module provides two things:
//!
//! 1. Process-level initialization of the `log` facade with an `env_logger`
//!    backend ([`init_logging`]). Log levels are determined by (in priority
//!    order):
//!    1. `RUST_LOG` environment variable (if set)
//!    2. CLI flags: `--quiet` (error only) or `--verbose` (debug/trace)
//!    3. Default: info level
//! 2. The [`CacheLogger`] trait through which the cache store and sweeper
//!    report events. Loggers are injected at construction time; the core
//!    holds no global logger state of its own.
//!
//! # Example
//!
//! ```rust,no_run
//! use dlcache::logging::{init_logging, CacheLogger, CacheOp, LogCacheLogger};
//!
//! init_logging(1, false);
//!
//! let logger = LogCacheLogger;
//! logger.cache_operation(CacheOp::Miss, "5d41402abc4b2a76b9719d911017c592", "expired");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Log target used for cache events.
pub const EVENT_TARGET: &str = "dlcache::events";

/// Initialize the logging subsystem based on CLI verbosity flags.
///
/// This function should be called once at the start of the application,
/// before any logging calls are made.
///
/// # Arguments
///
/// * `verbose` - Verbosity count from CLI (0=normal, 1=debug, 2+=trace)
/// * `quiet` - If true, only show errors (overridden by RUST_LOG)
///
/// # Panics
///
/// This function will panic if called more than once, as `env_logger`
/// can only be initialized once per process.
pub fn init_logging(verbose: u8, quiet: bool) {
    let use_env = env::var("RUST_LOG").is_ok();

    let mut builder = Builder::new();

    if use_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }

    configure_format(&mut builder, verbose);
    builder.init();

    if use_env {
        log::debug!(
            "Logging initialized from RUST_LOG environment variable: {:?}",
            env::var("RUST_LOG").ok()
        );
    } else {
        log::debug!(
            "Logging initialized at level: {:?}",
            determine_level(verbose, quiet)
        );
    }
}

/// Determine the log level from CLI flags.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Configure the log format based on build type and verbosity.
///
/// - Debug builds: timestamp, level, and module path when verbose
/// - Release builds: compact format (level + message only)
fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let timestamp = buf.timestamp_seconds();
            let level = record.level();
            let level_style = buf.default_level_style(level);

            if verbose >= 1 {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} [{}] {}",
                    timestamp,
                    level,
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} {}",
                    timestamp,
                    level,
                    record.args()
                )
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let level_style = buf.default_level_style(level);
            writeln!(
                buf,
                "{level_style}{:<5}{level_style:#} {}",
                level,
                record.args()
            )
        });
    }
}

/// Kind of cache state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    /// A valid entry was served.
    Hit,
    /// No valid entry; the detail carries the reason.
    Miss,
    /// An entry was admitted.
    Set,
    /// An entry was evicted.
    Delete,
    /// A whole store was emptied.
    Clear,
}

impl CacheOp {
    /// Upper-case label used in log lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Set => "SET",
            Self::Delete => "DELETE",
            Self::Clear => "CLEAR",
        }
    }
}

impl fmt::Display for CacheOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Receiver of cache events.
///
/// Every method has a default that forwards to the `log` facade, so an
/// implementation only overrides what it wants to capture.
pub trait CacheLogger: Send + Sync {
    /// Record a cache state transition for `key`.
    fn cache_operation(&self, op: CacheOp, key: &str, detail: &str) {
        match op {
            CacheOp::Miss | CacheOp::Delete => {
                log::debug!(target: EVENT_TARGET, "[{}] {} {}", op, key, detail);
            }
            _ => log::info!(target: EVENT_TARGET, "[{}] {} {}", op, key, detail),
        }
    }

    /// Informational message.
    fn info(&self, message: &str) {
        log::info!(target: EVENT_TARGET, "{}", message);
    }

    /// Debug message.
    fn debug(&self, message: &str) {
        log::debug!(target: EVENT_TARGET, "{}", message);
    }

    /// Recoverable failure.
    fn warn(&self, message: &str) {
        log::warn!(target: EVENT_TARGET, "{}", message);
    }

    /// Failure surfaced to the caller as `false`.
    fn error(&self, message: &str) {
        log::error!(target: EVENT_TARGET, "{}", message);
    }
}

/// Forwards everything to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCacheLogger;

impl CacheLogger for LogCacheLogger {}

/// A recorded cache event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    /// Transition kind
    pub op: CacheOp,
    /// Entry key
    pub key: String,
    /// Reason or extra detail
    pub detail: String,
}

/// Records cache events in memory and forwards messages to `log`.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<CacheEvent>>,
    warnings: Mutex<Vec<String>>,
}

impl MemoryLogger {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Details of recorded events of one kind, in order.
    #[must_use]
    pub fn details(&self, op: CacheOp) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.op == op)
            .map(|e| e.detail)
            .collect()
    }

    /// Snapshot of recorded warnings and errors.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

impl CacheLogger for MemoryLogger {
    fn cache_operation(&self, op: CacheOp, key: &str, detail: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(CacheEvent {
                op,
                key: key.to_string(),
                detail: detail.to_string(),
            });
        }
        log::debug!(target: EVENT_TARGET, "[{}] {} {}", op, key, detail);
    }

    fn warn(&self, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
        log::warn!(target: EVENT_TARGET, "{}", message);
    }

    fn error(&self, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
        log::error!(target: EVENT_TARGET, "{}", message);
    }
}
