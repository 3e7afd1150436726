//! This module defines the subcommands for the floc CLI.
//!
//! Each subcommand is implemented in its own module and is responsible for
//! handling its own arguments and logic. The `run` function in this module
//! dispatches to the appropriate subcommand based on the parsed arguments.

use clap::Subcommand;
use flake::registry::Registry;

use super::Args;

mod info;
mod registry;
mod resolve;
mod update;

//================================================================================================
// Types
//================================================================================================

/// The subcommands for the floc CLI.
#[derive(Subcommand)]
pub(super) enum Commands {
    /// Resolve a flake reference and print its pinned dependency closure.
    ///
    /// The reference is rewritten through the registries, fetched, and its
    /// dependencies are recursively resolved. The resulting closure is
    /// printed in lock-file form without writing anything.
    Resolve(resolve::Args),
    /// Update the lock file of a local flake.
    ///
    /// Re-resolves every dependency of the flake at the given path and
    /// rewrites its `flake.lock` atomically. Only local checkouts can be
    /// updated.
    Update(update::Args),
    /// Show the value a flake provides to consumers.
    ///
    /// Resolves the closure like `resolve`, then renders the attribute set
    /// handed to an evaluator: per flake its description, store path,
    /// revision count and unevaluated `provides` entry.
    Info(info::Args),
    /// Inspect or edit the user flake registry.
    Registry(registry::Args),
}

//================================================================================================
// Functions
//================================================================================================

/// The main entry point for the floc CLI.
pub fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Commands::Resolve(args) => resolve::run(args),
        Commands::Update(args) => update::run(args),
        Commands::Info(args) => info::run(args),
        Commands::Registry(args) => registry::run(args),
    }
}

/// Builds the flag registry from repeated `--override ID=TARGET` options.
pub(crate) fn flag_registry(overrides: &[String]) -> anyhow::Result<Registry> {
    let mut registry = Registry::default();
    for entry in overrides {
        let (from, to) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("override '{entry}' is not of the form ID=TARGET"))?;
        registry.set(from.parse()?, to.parse()?);
    }
    Ok(registry)
}
