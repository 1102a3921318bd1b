//! Standalone offline corruption scanner.
//!
//! Walks a directory tree and deletes every file that fails structural
//! validation, then prints a report. Exits with 2 if the root does not exist
//! and 3 if some invalid files could not be deleted.

use anyhow::Context;
use clap::Parser;
use dlcache::{
    cli::ScanCli,
    config::Config,
    error::{self, ExitCode},
    logging::init_logging,
    output::OutputFormat,
};

fn run(cli: &ScanCli) -> anyhow::Result<ExitCode> {
    if cli.no_color {
        yansi::disable();
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    dlcache::run_scan(&config, &cli.root, cli.dry_run, format, cli.quiet)
}

fn main() {
    let cli = ScanCli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => {
            let exit_code = ExitCode::for_error(&err);
            error::report(&err, exit_code, cli.json_errors);
            std::process::exit(exit_code.as_i32());
        }
    }
}
