//! # Flake Crate
//!
//! The `flake` crate implements the flake resolver: the machinery that takes
//! a reference to a self-describing source package, locates it through a
//! stack of registries, verifies its immutability when pure evaluation
//! demands it, evaluates its declarative metadata, recursively resolves its
//! dependency closure and pins the result into a reproducible lock file.
//!
//! ## Key Concepts
//!
//! A **flake** is a source tree carrying a `flake.nix` that declares its
//! identity, its dependencies and a `provides` function handed to consumers.
//! A **flake reference** names such a tree — directly (a git URL, a GitHub
//! repository, a local checkout) or indirectly (an alias rewritten through
//! registries). A reference pinned to a commit hash is **immutable**;
//! fetching it is reproducible, and only immutable references may appear in
//! a **lock file**.
//!
//! ## Architecture
//!
//! The crate is organized into several key modules:
//! - [`flakeref`] - The reference algebra: parsing, rendering, predicates.
//! - [`registry`] - Persistent alias registries and the lookup stack.
//! - [`fetch`] - Transports materializing references into the store.
//! - [`store`] - The content-addressed source store interface.
//! - [`eval`] - Evaluation of the declarative flake metadata subset.
//! - [`resolve`] - The recursive dependency resolver.
//! - [`lock`] - The lock-file codec.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use flake::registry::Registry;
//! use flake::resolve::Resolver;
//!
//! let resolver = Resolver::from_config(false, Registry::default()).unwrap();
//! let deps = resolver.resolve(&"nixpkgs".parse().unwrap(), true).unwrap();
//! println!("{:#?}", deps.lock_file());
//! ```

#![deny(missing_docs)]

pub use self::flakeref::{FlakeId, FlakeRef, FlakeRefData, Rev};
pub use self::lock::LockFile;
pub use self::registry::{Registry, RegistryStack};
pub use self::resolve::{Dependencies, Flake, NonFlake, Resolver};

pub mod eval;
pub mod fetch;
pub mod flakeref;
mod json;
pub mod lock;
pub mod registry;
pub mod resolve;
pub mod store;

/// The conventional filename for a flake's metadata.
pub const FLAKE_FILE: &str = "flake.nix";
/// The conventional filename for a flake's lock.
pub const LOCK_FILE: &str = "flake.lock";
