//! This module defines the `update` subcommand.
//!
//! The `update` subcommand re-resolves every dependency of a local flake and
//! rewrites its `flake.lock`.

use anyhow::Result;
use clap::Parser;
use flake::{FlakeRef, Resolver};

//================================================================================================
// Types
//================================================================================================

/// The `update` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The local flake whose lock file should be updated.
    #[arg(default_value = ".")]
    r#ref: String,

    /// Register an extra redirection for this invocation (repeatable).
    #[arg(long = "override", value_name = "ID=TARGET")]
    overrides: Vec<String>,
}

//================================================================================================
// Functions
//================================================================================================

/// The main entry point for the `update` subcommand.
pub(super) fn run(args: Args) -> Result<()> {
    let flake_ref: FlakeRef = args.r#ref.parse()?;
    let flag = super::flag_registry(&args.overrides)?;

    let resolver = Resolver::from_config(false, flag)?;
    let lock_file = resolver.update_lock_file(&flake_ref)?;

    let pinned = lock_file.flake_entries.len() + lock_file.non_flake_entries.len();
    tracing::info!(r#ref = %flake_ref, pinned, "lock file updated");
    Ok(())
}
