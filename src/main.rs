//! The main entry point for the floc CLI.

#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use floc::cli::{self, Args};

//================================================================================================
// Functions
//================================================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    let Args { log, .. } = args;

    let _guard = cli::init_global_subscriber(log);

    if let Err(e) = cli::run(args) {
        floc::fatal!(e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
