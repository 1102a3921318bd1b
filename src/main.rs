//! dlcache - Download cache with integrity verification
//!
//! Entry point for the dlcache CLI application.

use clap::Parser;
use dlcache::{
    cli::Cli,
    error::{self, ExitCode},
    logging::init_logging,
};

fn main() {
    let cli = Cli::parse();
    let json_errors = cli.json_errors;

    init_logging(cli.verbose, cli.quiet);

    match dlcache::run_app(cli) {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => {
            let exit_code = ExitCode::for_error(&err);
            error::report(&err, exit_code, json_errors);
            std::process::exit(exit_code.as_i32());
        }
    }
}
