//! This module defines the `resolve` subcommand.
//!
//! The `resolve` subcommand resolves a flake reference and prints the pinned
//! closure in lock-file form, without writing anything to disk.

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use flake::{FlakeRef, Resolver};

//================================================================================================
// Types
//================================================================================================

/// The `resolve` subcommand.
#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// The flake reference to resolve.
    r#ref: String,

    /// Resolve purely: only immutable references and explicit overrides.
    #[arg(long)]
    pure: bool,

    /// Register an extra redirection for this invocation (repeatable).
    #[arg(long = "override", value_name = "ID=TARGET")]
    overrides: Vec<String>,
}

//================================================================================================
// Functions
//================================================================================================

/// The main entry point for the `resolve` subcommand.
pub(super) fn run(args: Args) -> Result<()> {
    let flake_ref: FlakeRef = args.r#ref.parse()?;
    let flag = super::flag_registry(&args.overrides)?;

    let resolver = Resolver::from_config(args.pure, flag)?;
    let deps = resolver.resolve(&flake_ref, !args.pure)?;
    tracing::info!(flake = %deps.flake.id, r#ref = %deps.flake.r#ref, "resolved");

    let bytes = deps.lock_file().to_json_bytes()?;
    std::io::stdout().lock().write_all(&bytes)?;
    Ok(())
}
