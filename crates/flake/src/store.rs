//! # Source Store
//!
//! Fetched sources are materialized into a content-addressed store before
//! anything reads them. The resolver only depends on the small [`Store`]
//! interface: inserting a tree, asserting that a path belongs to the store,
//! and maintaining the allow-list consulted by purity sandboxing.
//!
//! [`LocalStore`] is the shipped implementation. Trees are addressed by a
//! deterministic digest over their contents (entry names, file types, the
//! executable bit and file bytes), so inserting the same tree twice yields
//! the same path and no copy.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use walkdir::WalkDir;

#[cfg(test)]
mod test;

//================================================================================================
// Types
//================================================================================================

/// An error encountered during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An I/O failure while hashing or copying a tree.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The given path does not belong to the store.
    #[error("path '{0}' is not a valid store path")]
    NotInStore(PathBuf),
}

/// The store interface the resolver depends on.
pub trait Store: Send + Sync {
    /// Inserts the tree at `source` into the store and returns its store path.
    fn add_path(&self, source: &Path, name: &str) -> Result<PathBuf, StoreError>;

    /// Fails unless `path` is a live path inside this store.
    fn assert_store_path(&self, path: &Path) -> Result<(), StoreError>;

    /// Records a path as readable under purity sandboxing.
    fn insert_allowed_path(&self, path: &Path);

    /// Returns the paths recorded by [`Store::insert_allowed_path`] so far.
    fn allowed_paths(&self) -> Vec<PathBuf>;
}

/// A store rooted at a local directory.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    allowed: Mutex<BTreeSet<PathBuf>>,
}

//================================================================================================
// Impls
//================================================================================================

impl LocalStore {
    /// Opens (and if necessary creates) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(LocalStore {
            root,
            allowed: Mutex::new(BTreeSet::new()),
        })
    }

    /// The root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Store for LocalStore {
    fn add_path(&self, source: &Path, name: &str) -> Result<PathBuf, StoreError> {
        let digest = tree_digest(source)?;
        let dest = self.root.join(format!("{}-{}", &digest[..32], name));
        if dest.exists() {
            tracing::debug!(path = %dest.display(), "store hit");
            return Ok(dest);
        }

        let staging = self.root.join(format!(".tmp-{}", &digest[..32]));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_tree(source, &staging)?;
        fs::rename(&staging, &dest)?;
        tracing::debug!(path = %dest.display(), "store insert");
        Ok(dest)
    }

    fn assert_store_path(&self, path: &Path) -> Result<(), StoreError> {
        if path.starts_with(&self.root) && path.exists() {
            Ok(())
        } else {
            Err(StoreError::NotInStore(path.to_owned()))
        }
    }

    fn insert_allowed_path(&self, path: &Path) {
        let mut allowed = match self.allowed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        allowed.insert(path.to_owned());
    }

    fn allowed_paths(&self) -> Vec<PathBuf> {
        let allowed = match self.allowed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        allowed.iter().cloned().collect()
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Copies a tree, preserving directories, file contents, permissions and
/// symlinks.
fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Computes the content digest a tree is addressed by.
///
/// The digest covers relative entry names in sorted order, each entry's type,
/// the executable bit of regular files, file contents and symlink targets.
fn tree_digest(root: &Path) -> Result<String, StoreError> {
    let mut hasher = blake3::Hasher::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        hasher.update(rel.to_string_lossy().as_bytes());
        let file_type = entry.file_type();
        if file_type.is_dir() {
            hasher.update(b"\0d\0");
        } else if file_type.is_symlink() {
            hasher.update(b"\0l");
            let link = fs::read_link(entry.path())?;
            hasher.update(link.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        } else {
            let executable = entry.metadata().map_err(io::Error::from)?.permissions().mode() & 0o100 != 0;
            hasher.update(if executable { b"\0x" } else { b"\0f" });
            hasher.update(&fs::read(entry.path())?);
            hasher.update(b"\0");
        }
    }
    Ok(hasher.finalize().to_hex().to_string())
}
