//! # Flake Resolution
//!
//! The heart of the crate: given a flake reference, rewrite it through the
//! registries, materialize its source, evaluate its metadata and recursively
//! resolve its declared dependencies into a [`Dependencies`] tree, from which
//! a lock file is derived.
//!
//! The [`Resolver`] is constructed once per evaluation. It owns the registry
//! stack, the fetcher and the store handle, and threads the pure-evaluation
//! flag explicitly: in pure mode only immutable references may be fetched,
//! with a single escape for the impure top-level call used by
//! [`Resolver::update_lock_file`].
//!
//! Diamond dependencies are deliberately duplicated in the resulting tree;
//! deduplicating into a graph keyed by resolved reference is a known future
//! refinement. Cycles between flakes, on the other hand, are detected via a
//! currently-resolving trail and fail resolution.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::eval::{self, Value};
use crate::fetch::{Fetcher, FlakeSourceInfo};
use crate::flakeref::{FlakeId, FlakeRef, FlakeRefData, IdError, ParseError, Rev};
use crate::lock::{self, FlakeEntry, LockFile};
use crate::registry::{self, Registry, RegistryStack};
use crate::store::{LocalStore, Store, StoreError};


//================================================================================================
// Types
//================================================================================================

/// A recursive dependency tree rooted at one flake.
#[derive(Debug, Clone)]
pub struct Dependencies {
    /// The flake this node describes.
    pub flake: Flake,
    /// Resolved flake dependencies, in declaration order.
    pub flake_deps: Vec<Dependencies>,
    /// Fetched non-flake dependencies, in declaration order.
    pub non_flake_deps: Vec<NonFlake>,
}

/// An error encountered during resolution.
#[derive(Error, Debug)]
pub enum Error {
    /// Registry reading or alias resolution failed.
    #[error(transparent)]
    Registry(#[from] registry::Error),
    /// Fetching a source failed.
    #[error(transparent)]
    Fetch(#[from] crate::fetch::Error),
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Metadata evaluation failed.
    #[error(transparent)]
    Eval(#[from] eval::Error),
    /// An embedded lock file failed to read.
    #[error(transparent)]
    Lock(#[from] lock::Error),
    /// A declared dependency reference did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// A flake or alias identifier was invalid.
    #[error(transparent)]
    Id(#[from] IdError),
    /// A required metadata attribute is missing.
    #[error("flake '{file}' lacks attribute '{attr}'")]
    MissingAttribute {
        /// The metadata file.
        file: PathBuf,
        /// The missing attribute.
        attr: &'static str,
    },
    /// A metadata or lock file inside the store is a symlink.
    #[error("'{0}' is a symlink, refusing to read it")]
    SymlinkRejected(PathBuf),
    /// Two flakes require each other, directly or transitively.
    #[error("dependency cycle between flakes: {0}")]
    DependencyCycle(String),
    /// `update_lock_file` was invoked on something other than a local flake.
    #[error("cannot update the lock file of non-local flake reference '{0}'")]
    NotLocal(FlakeRef),
}

/// Metadata extracted from a materialized flake source.
#[derive(Debug, Clone)]
pub struct Flake {
    /// The flake's declared identifier.
    pub id: FlakeId,
    /// The reference the flake was fetched from, pinned to the revision that
    /// was actually served.
    pub r#ref: FlakeRef,
    /// The store path of the fetched source.
    pub path: PathBuf,
    /// The declared description, if any.
    pub description: Option<String>,
    /// Declared flake dependencies, in declaration order.
    pub requires: Vec<FlakeRef>,
    /// Declared non-flake dependencies, keyed by alias.
    pub non_flake_requires: BTreeMap<FlakeId, FlakeRef>,
    /// The declared `provides` function, retained unevaluated.
    pub provides: Value,
    /// The length of the source's history, when the transport reports one.
    pub rev_count: Option<u64>,
    /// The lock file embedded in the source, empty when absent.
    pub lock_file: LockFile,
}

/// A fetched source without flake metadata.
#[derive(Debug, Clone)]
pub struct NonFlake {
    /// The reference the source was fetched from, pinned like a flake's.
    pub r#ref: FlakeRef,
    /// The store path of the fetched source.
    pub path: PathBuf,
    /// The alias under which the parent flake required this source.
    pub alias: FlakeId,
}

/// Resolves flake references into dependency trees and lock files.
pub struct Resolver {
    stack: RegistryStack,
    fetcher: Fetcher,
    store: Arc<dyn Store>,
    pure: bool,
}

//================================================================================================
// Impls
//================================================================================================

impl Dependencies {
    /// Derives the persistent lock from this tree.
    #[must_use]
    pub fn lock_file(&self) -> LockFile {
        let entry = self.entry();
        LockFile {
            flake_entries: entry.flake_entries,
            non_flake_entries: entry.non_flake_entries,
        }
    }

    fn entry(&self) -> FlakeEntry {
        let mut flake_entries = BTreeMap::new();
        for dep in &self.flake_deps {
            flake_entries.insert(dep.flake.id.clone(), dep.entry());
        }
        let mut non_flake_entries = BTreeMap::new();
        for non_flake in &self.non_flake_deps {
            non_flake_entries.insert(non_flake.alias.clone(), non_flake.r#ref.clone());
        }
        FlakeEntry {
            r#ref: self.flake.r#ref.clone(),
            flake_entries,
            non_flake_entries,
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Flake>) {
        out.push(&self.flake);
        for dep in &self.flake_deps {
            dep.collect(out);
        }
    }
}

impl Resolver {
    /// Builds a resolver from explicit parts.
    #[must_use]
    pub fn new(stack: RegistryStack, fetcher: Fetcher, store: Arc<dyn Store>, pure: bool) -> Self {
        Resolver {
            stack,
            fetcher,
            store,
            pure,
        }
    }

    /// Builds the production resolver from the application configuration.
    pub fn from_config(pure: bool, flag: Registry) -> Result<Self, Error> {
        let store: Arc<dyn Store> = Arc::new(LocalStore::open(config::CONFIG.store.root.clone())?);
        let fetcher = Fetcher::from_config(store.clone())?;
        let stack = RegistryStack::assemble(pure, flag)?;
        Ok(Resolver::new(stack, fetcher, store, pure))
    }

    /// The store this resolver materializes sources into.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Rewrites a reference through the registry stack.
    pub fn lookup(&self, flake_ref: &FlakeRef) -> Result<FlakeRef, Error> {
        Ok(self.stack.lookup(flake_ref)?)
    }

    /// Resolves and fetches a reference, returning the resolved reference
    /// alongside the materialized source.
    pub fn fetch(
        &self,
        flake_ref: &FlakeRef,
        impure_allowed: bool,
    ) -> Result<(FlakeRef, FlakeSourceInfo), Error> {
        let resolved = self.stack.lookup(flake_ref)?;
        let info = self.fetcher.fetch(&resolved, self.pure, impure_allowed)?;
        Ok((resolved, info))
    }

    /// Fetches a reference and evaluates its flake metadata.
    pub fn get_flake(&self, flake_ref: &FlakeRef, impure_allowed: bool) -> Result<Flake, Error> {
        let (resolved, info) = self.fetch(flake_ref, impure_allowed)?;
        tracing::debug!(
            source = %info.store_path.display(),
            rev = ?info.rev,
            "got flake source"
        );

        let path = info.store_path;
        self.store.assert_store_path(&path)?;
        self.store.insert_allowed_path(&path);

        let pinned = pin(resolved, info.rev);

        let meta = checked_path(&path, crate::FLAKE_FILE)?;
        let value = eval::eval_file(&meta)?;
        let attrs = value.require_attrs()?;

        let id = match attrs.get("name") {
            Some(name) => FlakeId::try_from(name.require_string()?.to_owned())?,
            None => {
                return Err(Error::MissingAttribute {
                    file: meta,
                    attr: "name",
                });
            },
        };

        let description = attrs
            .get("description")
            .map(|v| v.require_string().map(str::to_owned))
            .transpose()?;

        let mut requires = Vec::new();
        if let Some(list) = attrs.get("requires") {
            for item in list.require_list()? {
                requires.push(item.require_string()?.parse()?);
            }
        }

        let mut non_flake_requires = BTreeMap::new();
        if let Some(set) = attrs.get("nonFlakeRequires") {
            for (alias, item) in set.require_attrs()? {
                non_flake_requires.insert(
                    FlakeId::try_from(alias.clone())?,
                    item.require_string()?.parse()?,
                );
            }
        }

        let provides = match attrs.get("provides") {
            Some(value) => {
                value.require_lambda()?;
                value.clone()
            },
            None => {
                return Err(Error::MissingAttribute {
                    file: meta,
                    attr: "provides",
                });
            },
        };

        let lock_file = LockFile::read(&checked_path(&path, crate::LOCK_FILE)?)?;

        Ok(Flake {
            id,
            r#ref: pinned,
            path,
            description,
            requires,
            non_flake_requires,
            provides,
            rev_count: info.rev_count,
            lock_file,
        })
    }

    /// Fetches a reference that is not itself a flake.
    pub fn get_non_flake(&self, flake_ref: &FlakeRef, alias: FlakeId) -> Result<NonFlake, Error> {
        let (resolved, info) = self.fetch(flake_ref, false)?;
        tracing::debug!(
            source = %info.store_path.display(),
            rev = ?info.rev,
            "got non-flake source"
        );

        let path = info.store_path;
        self.store.assert_store_path(&path)?;
        self.store.insert_allowed_path(&path);

        Ok(NonFlake {
            r#ref: pin(resolved, info.rev),
            path,
            alias,
        })
    }

    /// Recursively resolves a flake and all of its dependencies.
    ///
    /// `impure_top` permits fetching a mutable root in pure mode; children
    /// never inherit it.
    pub fn resolve(&self, top: &FlakeRef, impure_top: bool) -> Result<Dependencies, Error> {
        let mut visiting = Vec::new();
        self.resolve_inner(top, impure_top, &mut visiting)
    }

    fn resolve_inner(
        &self,
        flake_ref: &FlakeRef,
        impure_allowed: bool,
        visiting: &mut Vec<FlakeRef>,
    ) -> Result<Dependencies, Error> {
        let flake = self.get_flake(flake_ref, impure_allowed)?;

        if visiting.contains(&flake.r#ref) {
            let mut trail = visiting.clone();
            trail.push(flake.r#ref.clone());
            return Err(Error::DependencyCycle(registry::render_trail(
                &trail, " -> ",
            )));
        }
        visiting.push(flake.r#ref.clone());

        let mut non_flake_deps = Vec::new();
        for (alias, non_flake_ref) in &flake.non_flake_requires {
            non_flake_deps.push(self.get_non_flake(non_flake_ref, alias.clone())?);
        }

        let mut flake_deps = Vec::new();
        for dep_ref in &flake.requires {
            flake_deps.push(self.resolve_inner(dep_ref, false, visiting)?);
        }

        visiting.pop();

        Ok(Dependencies {
            flake,
            flake_deps,
            non_flake_deps,
        })
    }

    /// Re-resolves a local flake and rewrites its `flake.lock`.
    ///
    /// Only a `Path` reference may be updated; updating a hosted or aliased
    /// root is meaningless and rejected.
    pub fn update_lock_file(&self, flake_ref: &FlakeRef) -> Result<LockFile, Error> {
        let FlakeRefData::Path { path } = &flake_ref.data else {
            return Err(Error::NotLocal(flake_ref.clone()));
        };

        let deps = self.resolve(flake_ref, true)?;
        let lock_file = deps.lock_file();
        lock_file.write(&path.join(crate::LOCK_FILE))?;
        Ok(lock_file)
    }

    /// Resolves a reference string the way the `getFlake` primitive does:
    /// impure top-level, returning the flake id of the root together with the
    /// closure value.
    pub fn get_flake_value(&self, uri: &str) -> Result<(FlakeId, Value), Error> {
        let flake_ref: FlakeRef = uri.parse()?;
        let deps = self.resolve(&flake_ref, true)?;
        let id = deps.flake.id.clone();
        Ok((id, make_flake_value(&deps)))
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Opens a file directly below a store path, refusing symlinks.
///
/// The returned path may not exist; absence is the caller's concern. What is
/// rejected is an existing entry that is a symlink, which could otherwise
/// point evaluation outside the store.
fn checked_path(base: &Path, file: &str) -> Result<PathBuf, Error> {
    let path = base.join(file);
    if let Ok(meta) = fs::symlink_metadata(&path) {
        if meta.file_type().is_symlink() {
            return Err(Error::SymlinkRejected(path));
        }
    }
    Ok(path)
}

/// Constructs the closure attribute set handed to consuming evaluators.
///
/// Every flake in the tree (the root included) contributes an entry keyed by
/// its id, exposing `description`, `outPath`, `revCount` when known, and
/// `provides` applied — unevaluated — to the closure set itself.
#[must_use]
pub fn make_flake_value(deps: &Dependencies) -> Value {
    let mut flakes = Vec::new();
    deps.collect(&mut flakes);

    let mut closure = BTreeMap::new();
    for flake in flakes {
        let mut entry = BTreeMap::new();
        entry.insert(
            "description".to_owned(),
            Value::string(flake.description.clone().unwrap_or_default()),
        );
        entry.insert(
            "outPath".to_owned(),
            Value::string(flake.path.display().to_string()),
        );
        if let Some(rev_count) = flake.rev_count {
            entry.insert("revCount".to_owned(), Value::integer(rev_count as i64));
        }
        entry.insert(
            "provides".to_owned(),
            Value::app(flake.provides.clone(), Value::self_ref()),
        );
        closure.insert(flake.id.to_string(), Value::attrs(entry));
    }

    Value::attrs(closure)
}

/// Rewrites a fetched reference so downstream consumers see it pinned.
///
/// GitHub references are rebuilt from their base with the served revision,
/// since the branch a tarball was requested under says nothing reproducible;
/// other shapes keep their form and gain the revision.
fn pin(resolved: FlakeRef, rev: Option<Rev>) -> FlakeRef {
    let Some(rev) = rev else {
        return resolved;
    };
    match resolved.data {
        FlakeRefData::GitHub { .. } => resolved.base_ref().with_rev(rev),
        _ => resolved.with_rev(rev),
    }
}
