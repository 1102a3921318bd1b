//! dlcache - Download cache with integrity verification
//!
//! A file-backed cache for downloaded artifacts (source archives, extension
//! packages, release indexes). Entries are keyed by source URL, re-validated
//! on every read, and reclaimed by an expiry and corruption sweeper. A
//! store-agnostic scanner cleans arbitrary data trees of truncated downloads
//! and saved error pages.

pub mod cache;
pub mod checksum;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod scan;
pub mod sweep;
pub mod validate;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::cache::{CacheManager, Namespace, SetOptions};
use crate::cli::{Cli, Commands, ConfigCommand, PruneArgs, ReportArgs};
use crate::config::Config;
use crate::error::ExitCode;
use crate::output::OutputFormat;
use crate::progress::Progress;
use crate::scan::Scanner;
use crate::sweep::Sweeper;
use crate::validate::Validator;

/// Run one `dlcache` command. Logging must already be initialized.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the command fails
/// in a way that is not expressed as an exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    if cli.no_color {
        yansi::disable();
    }

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = cli.cache_dir.clone() {
        config.cache_dir = Some(dir);
    }
    log::debug!("Cache root: {}", config.cache_root().display());

    match cli.command {
        Commands::Get(args) => {
            let manager = open_manager(&config);
            let store = manager.store(args.target.namespace);
            match store.get(&args.target.url, !args.no_verify) {
                Some(path) => {
                    println!("{}", path.display());
                    Ok(ExitCode::Success)
                }
                None => Ok(ExitCode::NotFound),
            }
        }
        Commands::Set(args) => {
            let manager = open_manager(&config);
            let options = SetOptions {
                checksums: (!args.checksums.is_empty())
                    .then(|| args.checksums.into_iter().collect::<BTreeMap<_, _>>()),
                algorithms: (!args.algorithms.is_empty()).then_some(args.algorithms),
            };
            let entry = manager
                .store(args.target.namespace)
                .try_set(&args.target.url, &args.file, &options)
                .with_context(|| format!("failed to cache {}", args.file.display()))?;
            println!("{}", entry.data_path.display());
            Ok(ExitCode::Success)
        }
        Commands::Delete(args) => {
            let manager = open_manager(&config);
            let freed = manager
                .store(args.namespace)
                .try_delete(&args.url)
                .with_context(|| format!("failed to delete {}", args.url))?;
            log::info!("Deleted {} ({} freed)", args.url, output::human_size(freed));
            Ok(ExitCode::Success)
        }
        Commands::Clear(args) => {
            let manager = open_manager(&config);
            let mut removed = 0;
            for ns in selected(args.namespace) {
                removed += manager
                    .store(ns)
                    .try_clear()
                    .with_context(|| format!("failed to clear {}", ns))?;
            }
            log::info!("Removed {} files", removed);
            Ok(ExitCode::Success)
        }
        Commands::Stats(args) => {
            let manager = open_manager(&config);
            let stats = manager
                .stats()
                .into_iter()
                .filter(|(ns, _)| args.namespace.map_or(true, |n| n == *ns))
                .collect();
            print!("{}", output::render_stats(&stats, args.output)?);
            if args.output == OutputFormat::Text {
                match manager.last_cleanup() {
                    Some(t) => println!("last cleanup: {}", output::format_timestamp(t)),
                    None => println!("last cleanup: never"),
                }
            }
            Ok(ExitCode::Success)
        }
        Commands::Sweep(args) => run_sweep(&config, &args),
        Commands::Prune(args) => run_prune(&config, &args),
        Commands::Cleanup(args) => {
            let report = CacheManager::new(&config).cleanup();
            print!("{}", output::render_cleanup(&report, args.output)?);
            Ok(ExitCode::Success)
        }
        Commands::Scan(args) => run_scan(&config, &args.root, args.dry_run, args.output, cli.quiet),
        Commands::Validate(args) => {
            let validator = Validator::new(config.file_types.clone());
            let mut all_valid = true;
            for file in &args.files {
                let result = match args.kind {
                    Some(kind) => validator.inspect_as(file, kind),
                    None => validator.inspect(file),
                };
                match result {
                    Ok(kind) => println!("ok    {} ({})", file.display(), kind),
                    Err(e) => {
                        all_valid = false;
                        println!("FAIL  {}: {}", file.display(), e);
                    }
                }
            }
            Ok(if all_valid {
                ExitCode::Success
            } else {
                ExitCode::GeneralError
            })
        }
        Commands::Digest(args) => {
            let algorithms = if args.algorithms.is_empty() {
                config.integrity.algorithms.clone()
            } else {
                args.algorithms
            };
            let digests = checksum::digest(&args.file, &algorithms)
                .with_context(|| format!("failed to hash {}", args.file.display()))?;
            match args.output {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&digests.into_names())?);
                }
                OutputFormat::Text => {
                    for (algorithm, hex) in digests.iter() {
                        println!("{:<7} {}  {}", algorithm, hex, args.file.display());
                    }
                }
            }
            Ok(ExitCode::Success)
        }
        Commands::Config(command) => run_config(&config, cli.config.as_deref(), command),
    }
}

/// Scan `root` for structurally invalid files and print the report.
///
/// Returns [`ExitCode::PartialSuccess`] if some invalid files could not be
/// deleted.
///
/// # Errors
///
/// Returns [`scan::ScanError`] (wrapped) if `root` is missing or not a directory.
pub fn run_scan(
    config: &Config,
    root: &Path,
    dry_run: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let scanner = Scanner::new(Validator::new(config.file_types.clone()))
        .dry_run(dry_run)
        .with_progress(Arc::new(Progress::new(quiet || format == OutputFormat::Json)));
    let report = scanner
        .scan(root)
        .with_context(|| format!("cannot scan {}", root.display()))?;
    print!("{}", output::render_scan(&report, format)?);
    if format == OutputFormat::Json {
        println!();
    }
    Ok(if report.has_failures() {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    })
}

fn open_manager(config: &Config) -> CacheManager {
    let manager = CacheManager::new(config);
    if let Some(report) = manager.maybe_auto_cleanup() {
        log::debug!(
            "Auto cleanup removed {} entries",
            report.sweep.removed() + report.prune.removed
        );
    }
    manager
}

fn selected(namespace: Option<Namespace>) -> Vec<Namespace> {
    match namespace {
        Some(ns) => vec![ns],
        None => Namespace::ALL.to_vec(),
    }
}

fn run_sweep(config: &Config, args: &ReportArgs) -> anyhow::Result<ExitCode> {
    let manager = CacheManager::new(config);
    let stats = selected(args.namespace)
        .into_iter()
        .map(|ns| (ns, Sweeper::new(manager.store(ns)).sweep()))
        .collect();
    print!("{}", output::render_sweep(&stats, args.output)?);
    Ok(ExitCode::Success)
}

fn run_prune(config: &Config, args: &PruneArgs) -> anyhow::Result<ExitCode> {
    let manager = CacheManager::new(config);
    let max_size = args.max_size.unwrap_or(config.max_size);
    let strategy = args.strategy.unwrap_or(config.cleanup.strategy);
    let keep_recent = args.keep_recent.unwrap_or(config.cleanup.keep_recent);
    let stats = selected(args.report.namespace)
        .into_iter()
        .map(|ns| {
            let sweeper = Sweeper::new(manager.store(ns));
            (ns, sweeper.prune_with(max_size, strategy, keep_recent))
        })
        .collect();
    print!("{}", output::render_prune(&stats, args.report.output)?);
    Ok(ExitCode::Success)
}

fn run_config(
    config: &Config,
    explicit_path: Option<&Path>,
    command: ConfigCommand,
) -> anyhow::Result<ExitCode> {
    let path = explicit_path
        .map(Path::to_path_buf)
        .or_else(Config::config_path);
    match command {
        ConfigCommand::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigCommand::Path => match path {
            Some(path) => println!("{}", path.display()),
            None => bail!("no configuration directory on this platform"),
        },
        ConfigCommand::Init { force } => {
            let Some(path) = path else {
                bail!("no configuration directory on this platform; pass --config PATH");
            };
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            log::info!("Wrote {}", path.display());
        }
    }
    Ok(ExitCode::Success)
}
