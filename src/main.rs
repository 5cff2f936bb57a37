//! volswap command line entry point
//!
//! Exits with 0 on success, 1 on bad arguments and otherwise with the code
//! of the error that stopped the run.

use clap::error::ErrorKind;
use clap::Parser;
use env_logger::Env;
use log::error;
use std::process::ExitCode;
use volswap::cli::Args;
use volswap::{transpose_volume, StoreRegistry};

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let config = args.into_config();
    let registry = StoreRegistry::with_defaults();
    match transpose_volume(&config, &registry) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
