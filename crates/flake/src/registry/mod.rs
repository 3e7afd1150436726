//! # Flake Registries
//!
//! A registry is a persistent map from flake references to flake references,
//! used to resolve aliases and rewrite URIs. Several registries are consulted
//! in a fixed priority order, assembled per evaluation into a
//! [`RegistryStack`]:
//!
//! 1. the **global** registry (currently a built-in empty placeholder),
//! 2. the **user** registry (`~/.config/nix/registry.json` by default),
//! 3. the **system** registry (`<data-dir>/nix/flake-registry.json`),
//! 4. the **flag** registry, supplied on the command line.
//!
//! In pure evaluation mode the first three are replaced by empty registries,
//! so only explicitly flagged redirections can influence resolution.
//!
//! ## On-Disk Format
//!
//! ```json
//! {
//!     "version": 1,
//!     "flakes": {
//!         "nixpkgs": {
//!             "uri": "github:NixOS/nixpkgs"
//!         }
//!     }
//! }
//! ```
//!
//! A missing file is an empty registry; any version other than `1` is
//! rejected. Files are written with 4-space indentation, atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flakeref::{FlakeRef, FlakeRefData, ParseError};
use crate::json;


//================================================================================================
// Constants
//================================================================================================

/// The only registry schema version this implementation understands.
const VERSION: u32 = 1;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while reading, writing or resolving registries.
#[derive(Error, Debug)]
pub enum Error {
    /// The registry file carries a version this implementation cannot read.
    #[error("flake registry '{path}' has unsupported version {version}")]
    VersionMismatch {
        /// The registry file.
        path: PathBuf,
        /// The version it declared.
        version: u32,
    },
    /// The registry file is not valid JSON.
    #[error("flake registry '{path}' is not valid JSON")]
    Json {
        /// The registry file.
        path: PathBuf,
        /// The underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// A reference string inside a registry did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// An I/O failure while reading or writing a registry file.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Registry resolution revisited a reference it had already produced.
    #[error("found cycle in flake registries: {0}")]
    RegistryCycle(String),
    /// No registry resolved an alias.
    #[error("indirect flake reference '{0}' is the result of a lookup")]
    UnresolvedAlias(FlakeRef),
}

/// An in-memory registry: a map from references to their redirection targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: BTreeMap<FlakeRef, FlakeRef>,
}

/// The ordered list of registries consulted during resolution.
#[derive(Debug, Clone, Default)]
pub struct RegistryStack {
    registries: Vec<Registry>,
}

#[derive(Serialize, Deserialize)]
struct EntryDoc {
    uri: String,
}

#[derive(Serialize, Deserialize)]
struct RegistryDoc {
    version: u32,
    #[serde(default)]
    flakes: BTreeMap<String, EntryDoc>,
}

//================================================================================================
// Impls
//================================================================================================

impl Registry {
    /// Reads a registry from `path`. A missing file yields an empty registry.
    pub fn read(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Ok(Registry::default());
        }

        let text = fs::read_to_string(path)?;
        let doc: RegistryDoc = serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.to_owned(),
            source,
        })?;
        if doc.version != VERSION {
            return Err(Error::VersionMismatch {
                path: path.to_owned(),
                version: doc.version,
            });
        }

        let mut entries = BTreeMap::new();
        for (key, entry) in doc.flakes {
            entries.insert(key.parse()?, entry.uri.parse()?);
        }

        Ok(Registry { entries })
    }

    /// Writes the registry to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let flakes = self
            .entries
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    EntryDoc {
                        uri: v.to_string(),
                    },
                )
            })
            .collect();
        let doc = RegistryDoc {
            version: VERSION,
            flakes,
        };
        let bytes = json::to_vec_pretty(&doc).map_err(|source| Error::Json {
            path: path.to_owned(),
            source,
        })?;
        json::write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Returns the redirection target recorded for `flake_ref`, if any.
    #[must_use]
    pub fn get(&self, flake_ref: &FlakeRef) -> Option<&FlakeRef> {
        self.entries.get(flake_ref)
    }

    /// Records a redirection, replacing any previous target for the key.
    pub fn set(&mut self, from: FlakeRef, to: FlakeRef) {
        self.entries.insert(from, to);
    }

    /// Removes a redirection; returns whether the key was present.
    pub fn remove(&mut self, from: &FlakeRef) -> bool {
        self.entries.remove(from).is_some()
    }

    /// Iterates the redirections in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&FlakeRef, &FlakeRef)> {
        self.entries.iter()
    }

    /// Whether this registry holds no redirections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(FlakeRef, FlakeRef)> for Registry {
    fn from_iter<T: IntoIterator<Item = (FlakeRef, FlakeRef)>>(iter: T) -> Self {
        Registry {
            entries: iter.into_iter().collect(),
        }
    }
}

impl RegistryStack {
    /// Assembles the stack for one evaluation from the configured registry
    /// locations.
    ///
    /// In pure mode the global, user and system registries are replaced by
    /// empty registries; the flag registry always participates.
    pub fn assemble(pure: bool, flag: Registry) -> Result<Self, Error> {
        let mut registries = if pure {
            vec![Registry::default(), Registry::default(), Registry::default()]
        } else {
            vec![
                // the global registry is a placeholder for a future distribution channel
                Registry::default(),
                Registry::read(&config::CONFIG.registry.user)?,
                Registry::read(&config::CONFIG.registry.system)?,
            ]
        };
        registries.push(flag);
        Ok(RegistryStack { registries })
    }

    /// Builds a stack directly from registries, highest priority first.
    #[must_use]
    pub fn from_registries(registries: Vec<Registry>) -> Self {
        RegistryStack { registries }
    }

    /// Rewrites a reference through the stack until it no longer matches any
    /// registry.
    ///
    /// Refinements carried by an alias override the corresponding fields of
    /// its registry target, so user-supplied pinning wins. Revisiting a
    /// target already produced during this lookup is a cycle and fails; an
    /// alias left over after the stack is exhausted is unresolved and fails.
    pub fn lookup(&self, flake_ref: &FlakeRef) -> Result<FlakeRef, Error> {
        let mut trail: Vec<FlakeRef> = Vec::new();
        let mut current = flake_ref.clone();

        'rewrite: loop {
            for registry in &self.registries {
                // an alias matches its registry key regardless of the
                // refinements it carries; they are transferred below
                let found = registry.get(&current).or_else(|| {
                    (!current.is_direct())
                        .then(|| registry.get(&current.base_ref()))
                        .flatten()
                });
                let Some(target) = found else {
                    continue;
                };
                let mut target = target.clone();
                if let FlakeRefData::Alias { .. } = current.data {
                    if current.r#ref.is_some() {
                        target.r#ref = current.r#ref.clone();
                    }
                    if current.rev.is_some() {
                        target.rev = current.rev;
                    }
                }
                if trail.contains(&target) {
                    trail.push(target);
                    return Err(Error::RegistryCycle(render_trail(&trail, " - ")));
                }
                trail.push(target.clone());
                current = target;
                continue 'rewrite;
            }
            break;
        }

        if current.is_direct() {
            Ok(current)
        } else {
            Err(Error::UnresolvedAlias(current))
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Joins a lookup trail for diagnostics.
pub(crate) fn render_trail(trail: &[FlakeRef], separator: &str) -> String {
    trail
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}
