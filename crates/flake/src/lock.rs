//! # Lock-File Format
//!
//! A lock file persists a resolved dependency closure, pinning every
//! transitive reference to an immutable revision. It is the product of
//! resolution and the contract consumed by reproducible re-evaluation:
//! deserialization rejects any reference that does not carry a commit hash.
//!
//! ## On-Disk Format
//!
//! ```json
//! {
//!     "version": 1,
//!     "nonFlakeRequires": {
//!         "support": {
//!             "uri": "github:alice/support/<rev>"
//!         }
//!     },
//!     "requires": {
//!         "beta": {
//!             "uri": "github:alice/beta/<rev>",
//!             "requires": { }
//!         }
//!     }
//! }
//! ```
//!
//! Flake entries are keyed by the dependency's flake id, non-flake entries by
//! the alias their parent declared. Keys are emitted in sorted order and the
//! document is written with 4-space indentation, atomically, so re-serializing
//! an unchanged closure is reproducible bit for bit.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flakeref::{FlakeId, FlakeRef, IdError, ParseError};
use crate::json;

#[cfg(test)]
mod test;

//================================================================================================
// Constants
//================================================================================================

/// The only lock-file schema version this implementation understands.
const VERSION: u32 = 1;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while reading or writing a lock file.
#[derive(Error, Debug)]
pub enum Error {
    /// The lock file carries a version this implementation cannot read.
    #[error("lock file '{path}' has unsupported version {version}")]
    VersionMismatch {
        /// The lock file.
        path: PathBuf,
        /// The version it declared.
        version: u32,
    },
    /// The lock file is not valid JSON.
    #[error("lock file '{path}' is not valid JSON")]
    Json {
        /// The lock file.
        path: PathBuf,
        /// The underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// A reference inside a lock file is mutable.
    #[error("requested to fetch flake reference '{0}' purely, which is mutable")]
    MutableRef(FlakeRef),
    /// A reference string inside a lock file did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// An entry key is not a valid flake identifier.
    #[error(transparent)]
    Id(#[from] IdError),
    /// An I/O failure while reading or writing the lock file.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One pinned flake in a lock file, with its own pinned dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakeEntry {
    /// The immutable reference of the pinned flake.
    pub r#ref: FlakeRef,
    /// Pinned flake dependencies, keyed by flake id.
    pub flake_entries: BTreeMap<FlakeId, FlakeEntry>,
    /// Pinned non-flake dependencies, keyed by alias.
    pub non_flake_entries: BTreeMap<FlakeId, FlakeRef>,
}

/// A resolved dependency closure in its persistent form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockFile {
    /// Pinned flake dependencies of the root, keyed by flake id.
    pub flake_entries: BTreeMap<FlakeId, FlakeEntry>,
    /// Pinned non-flake dependencies of the root, keyed by alias.
    pub non_flake_entries: BTreeMap<FlakeId, FlakeRef>,
}

#[derive(Serialize, Deserialize)]
struct EntryDoc {
    uri: String,
    #[serde(
        rename = "nonFlakeRequires",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    non_flake_requires: BTreeMap<String, UriDoc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    requires: BTreeMap<String, EntryDoc>,
}

#[derive(Serialize, Deserialize)]
struct LockDoc {
    version: u32,
    #[serde(rename = "nonFlakeRequires", default)]
    non_flake_requires: BTreeMap<String, UriDoc>,
    #[serde(default)]
    requires: BTreeMap<String, EntryDoc>,
}

#[derive(Serialize, Deserialize)]
struct UriDoc {
    uri: String,
}

//================================================================================================
// Impls
//================================================================================================

impl LockFile {
    /// Reads a lock file from `path`. A missing file yields an empty lock.
    pub fn read(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Ok(LockFile::default());
        }

        let text = fs::read_to_string(path)?;
        let doc: LockDoc = serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.to_owned(),
            source,
        })?;
        if doc.version != VERSION {
            return Err(Error::VersionMismatch {
                path: path.to_owned(),
                version: doc.version,
            });
        }

        Ok(LockFile {
            flake_entries: read_entries(doc.requires)?,
            non_flake_entries: read_uris(doc.non_flake_requires)?,
        })
    }

    /// Writes the lock file to `path`, atomically, creating parent
    /// directories.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let bytes = self.to_json_bytes().map_err(|source| Error::Json {
            path: path.to_owned(),
            source,
        })?;
        json::write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Renders the lock file in its canonical on-disk form.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let doc = LockDoc {
            version: VERSION,
            non_flake_requires: write_uris(&self.non_flake_entries),
            requires: write_entries(&self.flake_entries),
        };
        json::to_vec_pretty(&doc)
    }

    /// Whether the lock pins no dependencies at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flake_entries.is_empty() && self.non_flake_entries.is_empty()
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Parses a reference out of a lock file, enforcing immutability.
fn locked_ref(uri: &str) -> Result<FlakeRef, Error> {
    let flake_ref: FlakeRef = uri.parse()?;
    if !flake_ref.is_immutable() {
        return Err(Error::MutableRef(flake_ref));
    }
    Ok(flake_ref)
}

fn read_entries(docs: BTreeMap<String, EntryDoc>) -> Result<BTreeMap<FlakeId, FlakeEntry>, Error> {
    let mut entries = BTreeMap::new();
    for (id, doc) in docs {
        let entry = FlakeEntry {
            r#ref: locked_ref(&doc.uri)?,
            flake_entries: read_entries(doc.requires)?,
            non_flake_entries: read_uris(doc.non_flake_requires)?,
        };
        entries.insert(FlakeId::try_from(id)?, entry);
    }
    Ok(entries)
}

fn read_uris(docs: BTreeMap<String, UriDoc>) -> Result<BTreeMap<FlakeId, FlakeRef>, Error> {
    let mut entries = BTreeMap::new();
    for (alias, doc) in docs {
        entries.insert(FlakeId::try_from(alias)?, locked_ref(&doc.uri)?);
    }
    Ok(entries)
}

fn write_entries(entries: &BTreeMap<FlakeId, FlakeEntry>) -> BTreeMap<String, EntryDoc> {
    entries
        .iter()
        .map(|(id, entry)| {
            (
                id.to_string(),
                EntryDoc {
                    uri: entry.r#ref.to_string(),
                    non_flake_requires: write_uris(&entry.non_flake_entries),
                    requires: write_entries(&entry.flake_entries),
                },
            )
        })
        .collect()
}

fn write_uris(entries: &BTreeMap<FlakeId, FlakeRef>) -> BTreeMap<String, UriDoc> {
    entries
        .iter()
        .map(|(alias, flake_ref)| {
            (
                alias.to_string(),
                UriDoc {
                    uri: flake_ref.to_string(),
                },
            )
        })
        .collect()
}
