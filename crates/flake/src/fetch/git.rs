//! The git exporter.
//!
//! Local repositories are opened with gitoxide for revision resolution and
//! history counting. Tree export, cloning and remote fetching go through the
//! `git` binary instead.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::GitExporter;
use crate::flakeref::Rev;
use crate::store::{Store, StoreError};

//================================================================================================
// Types
//================================================================================================

/// The production [`GitExporter`].
pub struct GitCli {
    cache_dir: PathBuf,
    store: Arc<dyn Store>,
}

/// An error encountered while exporting a git tree.
#[derive(Error, Debug)]
pub enum GitError {
    /// No git repository was found at or above the given path.
    #[error(transparent)]
    Discover(#[from] Box<gix::discover::Error>),
    /// A revision specification did not resolve to a commit.
    #[error("failed to resolve '{spec}' in '{repo}'")]
    Resolve {
        /// The revision specification.
        spec: String,
        /// The repository it was resolved against.
        repo: PathBuf,
        /// The underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Walking the commit history failed.
    #[error("history walk failed in '{repo}'")]
    Walk {
        /// The repository being walked.
        repo: PathBuf,
        /// The underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Command output that should have named a commit did not.
    #[error("'{0}' did not name a commit hash")]
    BadRev(String),
    /// The repository has no working directory to export from.
    #[error("repository '{0}' does not have a working directory")]
    NoWorkDir(PathBuf),
    /// A repository path was not valid unicode.
    #[error("non-unicode repository path '{0}'")]
    BadPath(PathBuf),
    /// An I/O failure, typically a failing `git` invocation.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Inserting the exported tree into the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An exported git tree with its provenance.
#[derive(Debug, Clone)]
pub struct GitExport {
    /// The store path of the exported tree.
    pub store_path: PathBuf,
    /// The commit the tree corresponds to.
    pub rev: Rev,
    /// The number of commits reachable from [`GitExport::rev`].
    pub rev_count: u64,
}

//================================================================================================
// Impls
//================================================================================================

impl GitCli {
    /// Builds an exporter keeping clones under `cache_dir` and inserting into
    /// `store`.
    #[must_use]
    pub fn new(cache_dir: PathBuf, store: Arc<dyn Store>) -> Self {
        GitCli { cache_dir, store }
    }

    /// Exports a repository available on the local filesystem.
    fn export_local(
        &self,
        dir: &Path,
        reference: Option<&str>,
        rev: Option<&Rev>,
        name: &str,
    ) -> Result<GitExport, GitError> {
        let repo = gix::discover(dir).map_err(Box::new)?;
        let spec = rev_spec(reference, rev);

        let commit = repo
            .rev_parse_single(spec.as_str())
            .map_err(|e| GitError::Resolve {
                spec: spec.clone(),
                repo: dir.to_owned(),
                source: Box::new(e),
            })
            .map(|id| repo.find_commit(id))?
            .map_err(|e| GitError::Resolve {
                spec: spec.clone(),
                repo: dir.to_owned(),
                source: Box::new(e),
            })?;

        let rev = Rev::try_from(commit.id.as_bytes())
            .map_err(|_| GitError::BadRev(spec.clone()))?;

        let mut walk = commit
            .ancestors()
            .all()
            .map_err(|e| GitError::Walk {
                repo: dir.to_owned(),
                source: Box::new(e),
            })?;
        let mut rev_count = 0u64;
        while let Some(Ok(_)) = walk.next() {
            rev_count += 1;
        }

        let workdir = repo
            .work_dir()
            .ok_or_else(|| GitError::NoWorkDir(dir.to_owned()))?
            .to_owned();
        let store_path = self.export_tree(&workdir, &rev, name)?;

        Ok(GitExport {
            store_path,
            rev,
            rev_count,
        })
    }

    /// Exports a remote repository by cloning its full history into the cache.
    fn export_remote(
        &self,
        url: &str,
        reference: Option<&str>,
        rev: Option<&Rev>,
        name: &str,
    ) -> Result<GitExport, GitError> {
        let key = blake3::hash(url.as_bytes()).to_hex();
        let checkout = self.cache_dir.join("git").join(&key.as_str()[..32]);
        let checkout_str = path_str(&checkout)?.to_owned();

        if !checkout.exists() {
            if let Some(parent) = checkout.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(url, "cloning");
            run_git_command(&["clone", "--bare", url, &checkout_str])?;
        } else {
            // when the requested commit is already present, skip the network
            let have_rev = rev.is_some_and(|r| {
                run_git_command(&[
                    "-C",
                    &checkout_str,
                    "cat-file",
                    "-e",
                    &format!("{r}^{{commit}}"),
                ])
                .is_ok()
            });
            if !have_rev {
                tracing::info!(url, "fetching");
                run_git_command(&[
                    "-C",
                    &checkout_str,
                    "fetch",
                    "--prune",
                    "origin",
                    "+refs/heads/*:refs/heads/*",
                ])?;
            }
        }

        let spec = rev_spec(reference, rev);
        let out = run_git_command(&[
            "-C",
            &checkout_str,
            "rev-parse",
            &format!("{spec}^{{commit}}"),
        ])?;
        let rev: Rev = String::from_utf8_lossy(&out)
            .trim()
            .parse()
            .map_err(|_| GitError::BadRev(spec.clone()))?;

        let out = run_git_command(&["-C", &checkout_str, "rev-list", "--count", &rev.to_string()])?;
        let rev_count: u64 = String::from_utf8_lossy(&out)
            .trim()
            .parse()
            .map_err(|_| GitError::BadRev(rev.to_string()))?;

        let store_path = self.export_tree(&checkout, &rev, name)?;

        Ok(GitExport {
            store_path,
            rev,
            rev_count,
        })
    }

    /// Extracts the tree of `rev` via `git archive` and inserts it into the
    /// store.
    fn export_tree(&self, repo: &Path, rev: &Rev, name: &str) -> Result<PathBuf, GitError> {
        let repo_str = path_str(repo)?;
        let tarball = run_git_command(&[
            "-C",
            repo_str,
            "archive",
            "--format=tar",
            &rev.to_string(),
        ])?;
        std::fs::create_dir_all(&self.cache_dir)?;
        let scratch = tempfile::tempdir_in(&self.cache_dir)?;
        tar::Archive::new(&tarball[..]).unpack(scratch.path())?;
        Ok(self.store.add_path(scratch.path(), name)?)
    }
}

impl GitExporter for GitCli {
    fn export(
        &self,
        url: &str,
        reference: Option<&str>,
        rev: Option<&Rev>,
        name: &str,
    ) -> Result<GitExport, GitError> {
        match local_path(url) {
            Some(path) => self.export_local(path, reference, rev, name),
            None => self.export_remote(url, reference, rev, name),
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Interprets a URL as a local filesystem path when possible.
fn local_path(url: &str) -> Option<&Path> {
    url.strip_prefix("file://")
        .map(Path::new)
        .or_else(|| (url.starts_with('/') || url.starts_with('.')).then(|| Path::new(url)))
}

fn path_str(path: &Path) -> Result<&str, GitError> {
    path.to_str().ok_or_else(|| GitError::BadPath(path.to_owned()))
}

fn rev_spec(reference: Option<&str>, rev: Option<&Rev>) -> String {
    match (rev, reference) {
        (Some(r), _) => r.to_string(),
        (None, Some(branch)) => branch.to_owned(),
        (None, None) => "HEAD".to_owned(),
    }
}

/// Runs the git binary, returning its standard output or the error stream as
/// an error, depending on the exit status.
///
/// Note: we rely on this only for operations that are not practical through
/// gitoxide here (clone, fetch and archive).
pub fn run_git_command(args: &[&str]) -> io::Result<Vec<u8>> {
    use std::process::Command;
    let output = Command::new("git").args(args).output()?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(io::Error::other(String::from_utf8_lossy(&output.stderr)))
    }
}
