//! Command-line interface definitions for dlcache.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! Global options (verbosity, color, configuration) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Look up a cached download
//! dlcache get https://www.php.net/distributions/php-8.3.0.tar.gz
//!
//! # Admit a downloaded file with a known checksum
//! dlcache set https://example.com/ext.tgz /tmp/ext.tgz --checksum sha256=9f86d08...
//!
//! # Remove expired and corrupted entries everywhere
//! dlcache sweep
//!
//! # Clean a whole data tree, reporting only
//! dlcache scan /var/lib/phpvm --dry-run
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::cache::Namespace;
use crate::checksum::Algorithm;
use crate::config::CleanupStrategy;
use crate::output::OutputFormat;
use crate::validate::FileKind;

/// Download cache with integrity verification and corruption sweeping.
#[derive(Debug, Parser)]
#[command(name = "dlcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cache root directory (overrides configuration)
    #[arg(long, global = true, value_name = "PATH", env = "DLCACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Print errors as JSON documents
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the cached path for a URL (exit code 2 on a miss)
    Get(GetArgs),
    /// Admit a downloaded file into the cache
    Set(SetArgs),
    /// Remove the entry for a URL
    Delete(UrlArgs),
    /// Remove every entry (in one namespace, or all)
    Clear(NamespaceArgs),
    /// Show entry counts and disk usage
    Stats(ReportArgs),
    /// Remove expired and corrupted entries
    Sweep(ReportArgs),
    /// Evict valid entries until each namespace fits a size limit
    Prune(PruneArgs),
    /// Sweep then prune every namespace and record the cleanup time
    Cleanup(OutputArgs),
    /// Delete structurally invalid files anywhere under a directory
    Scan(ScanArgs),
    /// Check files against the structural validator
    Validate(ValidateArgs),
    /// Compute checksums of a file
    Digest(DigestArgs),
    /// Show or write the configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Namespace selector shared by cache subcommands.
#[derive(Debug, Args)]
pub struct NamespaceArgs {
    /// Cache namespace (all namespaces for clear, downloads otherwise)
    #[arg(short, long, value_enum)]
    pub namespace: Option<Namespace>,
}

/// Arguments for subcommands addressing one URL.
#[derive(Debug, Args)]
pub struct UrlArgs {
    /// Source URL, used verbatim as the cache key
    #[arg(value_name = "URL")]
    pub url: String,

    /// Cache namespace
    #[arg(short, long, value_enum, default_value = "downloads")]
    pub namespace: Namespace,
}

/// Arguments for the get subcommand.
#[derive(Debug, Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: UrlArgs,

    /// Skip size, checksum and structure checks on hit
    #[arg(long)]
    pub no_verify: bool,
}

/// Arguments for the set subcommand.
#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: UrlArgs,

    /// File to admit
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Known checksum of the file as ALGORITHM=HEX (repeatable)
    #[arg(long = "checksum", value_name = "ALG=HEX", value_parser = parse_checksum)]
    pub checksums: Vec<(String, String)>,

    /// Algorithms to compute when no checksum is given (repeatable)
    #[arg(short, long = "algorithm", value_name = "ALG", conflicts_with = "checksums")]
    pub algorithms: Vec<Algorithm>,
}

/// Arguments for report-producing cache subcommands.
#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Restrict to one namespace
    #[arg(short, long, value_enum)]
    pub namespace: Option<Namespace>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Output format selector.
#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the prune subcommand.
#[derive(Debug, Args)]
pub struct PruneArgs {
    #[command(flatten)]
    pub report: ReportArgs,

    /// Size limit per namespace (e.g. 500MB, 2GiB); defaults to max_size
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_size: Option<u64>,

    /// Eviction order (defaults to cleanup.strategy)
    #[arg(long, value_enum)]
    pub strategy: Option<CleanupStrategy>,

    /// Never evict this many most recent entries (defaults to cleanup.keep_recent)
    #[arg(long, value_name = "N")]
    pub keep_recent: Option<usize>,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan recursively
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Report invalid files without deleting them
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the validate subcommand.
#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Files to check
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Validate as this kind instead of inferring from the name
    #[arg(long, value_name = "KIND", value_parser = parse_kind)]
    pub kind: Option<FileKind>,
}

/// Arguments for the digest subcommand.
#[derive(Debug, Args)]
pub struct DigestArgs {
    /// File to hash
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Algorithms to compute (repeatable; defaults to integrity.algorithms)
    #[arg(short, long = "algorithm", value_name = "ALG")]
    pub algorithms: Vec<Algorithm>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Arguments of the standalone `dlcache-scan` binary.
#[derive(Debug, Parser)]
#[command(name = "dlcache-scan")]
#[command(author, version, about = "Delete structurally invalid files under a directory", long_about = None)]
pub struct ScanCli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file providing per-type size bounds
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print errors as JSON documents
    #[arg(long)]
    pub json_errors: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Report invalid files without deleting them
    #[arg(long)]
    pub dry_run: bool,

    /// Directory to scan recursively
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use dlcache::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1KiB").unwrap(), 1024);
/// assert_eq!(parse_size("2GiB").unwrap(), 2_147_483_648);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}

/// Parse `ALGORITHM=HEX` into a checksum pair with a canonical algorithm name.
///
/// # Errors
///
/// Returns an error if the `=` is missing, the algorithm is unknown, or the
/// digest is not hexadecimal of the algorithm's length.
pub fn parse_checksum(s: &str) -> Result<(String, String), String> {
    let (name, hex) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected ALGORITHM=HEX, got '{s}'"))?;
    let algorithm: Algorithm = name.trim().parse().map_err(|e| format!("{e}"))?;
    let hex = hex.trim().to_ascii_lowercase();
    if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "{} digest must be {} hex characters",
            algorithm,
            algorithm.hex_len()
        ));
    }
    Ok((algorithm.name().to_string(), hex))
}

/// Parse a file kind by name (`gzip`, `tar`, `zip`, ...).
///
/// # Errors
///
/// Returns an error listing the known kinds.
pub fn parse_kind(s: &str) -> Result<FileKind, String> {
    let wanted = s.trim().to_ascii_lowercase();
    FileKind::ALL
        .iter()
        .copied()
        .find(|k| k.name() == wanted)
        .ok_or_else(|| {
            let names: Vec<&str> = FileKind::ALL.iter().map(|k| k.name()).collect();
            format!("Unknown file kind '{}' (expected one of: {})", s, names.join(", "))
        })
}
