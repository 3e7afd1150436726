//! This module defines the `info` subcommand.
//!
//! The `info` subcommand resolves a flake and renders the closure value its
//! consumers would receive.

use anyhow::Result;
use clap::Parser;
use flake::Resolver;

//================================================================================================
// Types
//================================================================================================

/// The `info` subcommand.
#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// The flake reference to inspect.
    r#ref: String,

    /// Register an extra redirection for this invocation (repeatable).
    #[arg(long = "override", value_name = "ID=TARGET")]
    overrides: Vec<String>,
}

//================================================================================================
// Functions
//================================================================================================

/// The main entry point for the `info` subcommand.
pub(super) fn run(args: Args) -> Result<()> {
    let flag = super::flag_registry(&args.overrides)?;

    let resolver = Resolver::from_config(false, flag)?;
    let (id, value) = resolver.get_flake_value(&args.r#ref)?;

    tracing::info!(flake = %id, "resolved");
    println!("{value}");
    Ok(())
}
