//! This module defines the `registry` subcommand.
//!
//! The `registry` subcommand lists and edits the user registry, the file
//! consulted between the global and system registries during resolution.

use anyhow::Result;
use clap::{Parser, Subcommand};
use flake::registry::Registry;

//================================================================================================
// Types
//================================================================================================

/// The `registry` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the redirections in the user registry.
    List,
    /// Add or replace a redirection in the user registry.
    Add {
        /// The reference to redirect, typically an alias.
        from: String,
        /// The reference it should resolve to.
        to: String,
    },
    /// Remove a redirection from the user registry.
    Remove {
        /// The redirected reference to remove.
        from: String,
    },
}

//================================================================================================
// Functions
//================================================================================================

/// The main entry point for the `registry` subcommand.
pub(super) fn run(args: Args) -> Result<()> {
    let path = &config::CONFIG.registry.user;

    match args.command {
        Command::List => {
            let registry = Registry::read(path)?;
            for (from, to) in registry.iter() {
                println!("{from} -> {to}");
            }
        },
        Command::Add { from, to } => {
            let mut registry = Registry::read(path)?;
            registry.set(from.parse()?, to.parse()?);
            registry.write(path)?;
            tracing::info!(%from, %to, "registry entry added");
        },
        Command::Remove { from } => {
            let mut registry = Registry::read(path)?;
            if registry.remove(&from.parse()?) {
                registry.write(path)?;
                tracing::info!(%from, "registry entry removed");
            } else {
                tracing::warn!(%from, "no such registry entry");
            }
        },
    }
    Ok(())
}
