//! Text and JSON rendering of command results.
//!
//! Text output is meant for terminals and uses yansi colors (disabled with
//! `--no-color` or `NO_COLOR`); JSON output is pretty-printed for scripting.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use bytesize::ByteSize;
use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde::Serialize;
use yansi::Paint;

use crate::cache::{CleanupReport, Namespace, StoreStats};
use crate::scan::ScanReport;
use crate::sweep::{PruneStats, SweepStats};

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Human-readable size.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

/// Local date and time for a Unix timestamp in seconds.
#[must_use]
pub fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Render per-namespace store statistics.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_stats(
    stats: &BTreeMap<Namespace, StoreStats>,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return to_json(stats);
    }
    let mut out = String::new();
    let mut total = StoreStats::default();
    for (ns, s) in stats {
        let _ = writeln!(
            out,
            "{:<12} {:>6} entries  {:>10}",
            ns.bold(),
            s.count,
            human_size(s.total_bytes)
        );
        total.count += s.count;
        total.total_bytes += s.total_bytes;
    }
    let _ = writeln!(
        out,
        "{:<12} {:>6} entries  {:>10}",
        "total".bold(),
        total.count,
        human_size(total.total_bytes)
    );
    Ok(out)
}

/// Render per-namespace sweep results.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_sweep(
    stats: &BTreeMap<Namespace, SweepStats>,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return to_json(stats);
    }
    let mut out = String::new();
    for (ns, s) in stats {
        let _ = writeln!(
            out,
            "{:<12} checked {:>5}  expired {:>5}  corrupted {:>5}  freed {}",
            ns.bold(),
            s.checked,
            s.expired_removed,
            s.corrupted_removed,
            human_size(s.bytes_freed).green()
        );
    }
    Ok(out)
}

/// Render per-namespace prune results.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_prune(
    stats: &BTreeMap<Namespace, PruneStats>,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return to_json(stats);
    }
    let mut out = String::new();
    for (ns, s) in stats {
        let _ = writeln!(
            out,
            "{:<12} removed {:>5}  freed {}  remaining {}",
            ns.bold(),
            s.removed,
            human_size(s.bytes_freed).green(),
            human_size(s.remaining_bytes)
        );
    }
    Ok(out)
}

/// Render a full cleanup run.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_cleanup(
    report: &CleanupReport,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return to_json(report);
    }
    let freed = report.sweep.bytes_freed + report.prune.bytes_freed;
    Ok(format!(
        "Swept {} entries: {} expired, {} corrupted\nPruned {} entries\nFreed {}\n",
        report.sweep.checked,
        report.sweep.expired_removed,
        report.sweep.corrupted_removed,
        report.prune.removed,
        human_size(freed).green()
    ))
}

/// Render an offline scan report.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_scan(report: &ScanReport, format: OutputFormat) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return to_json(report);
    }
    let mut out = String::new();
    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    let _ = writeln!(out, "{} {}", "Scanned".bold(), report.root.display());
    let _ = writeln!(out, "  Checked:     {} files", report.checked);
    let _ = writeln!(out, "  Skipped:     {} files", report.skipped);
    let _ = writeln!(out, "  {:<12} {} files", format!("{}:", verb), report.deleted);
    let _ = writeln!(out, "  Bytes freed: {}", human_size(report.bytes_freed).green());

    if !report.deleted_files.is_empty() {
        let _ = writeln!(out, "\n{}", verb.yellow().bold());
        for file in &report.deleted_files {
            let _ = writeln!(
                out,
                "  {} ({}): {}",
                file.path.display(),
                human_size(file.size),
                file.reason
            );
        }
    }
    if report.has_failures() {
        let _ = writeln!(out, "\n{}", "Failed to delete".red().bold());
        for failure in &report.failures {
            let _ = writeln!(out, "  {}: {}", failure.path.display(), failure.message);
        }
    }
    Ok(out)
}
