//! # Source Fetching
//!
//! Materializes a resolved flake reference into the store. The fetcher
//! dispatches on the reference shape:
//!
//! - **GitHub** references download a single-revision tarball through the
//!   [`Downloader`]; the commit hash is recovered from the response's `ETag`
//!   header, which GitHub sets to the quoted revision.
//! - **Git** references are cloned and exported through the [`GitExporter`],
//!   which also reports the revision and the length of its history.
//! - **Path** references must point at a git checkout; the current commit of
//!   the working tree is exported.
//!
//! Purity is enforced here, before any network activity: in pure mode a
//! mutable reference is rejected unless the caller explicitly marked this
//! fetch as the impure top level.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::flakeref::{FlakeRef, FlakeRefData, Rev};
use crate::store::Store;

pub use download::{DownloadError, HttpDownloader};
pub use git::{GitCli, GitError, GitExport, run_git_command};

mod download;
mod git;

#[cfg(test)]
mod test;

//================================================================================================
// Constants
//================================================================================================

/// The tarball TTL used for immutable references; long enough to never
/// refetch in practice.
const IMMUTABLE_TTL: u64 = 1_000_000_000;

//================================================================================================
// Types
//================================================================================================

/// A file (or unpacked tree) produced by the [`Downloader`].
#[derive(Debug, Clone)]
pub struct DownloadedTree {
    /// The store path of the unpacked tree.
    pub store_path: PathBuf,
    /// The `ETag` header of the response, if the server sent one.
    pub etag: Option<String>,
}

/// An error encountered while fetching a source.
#[derive(Error, Debug)]
pub enum Error {
    /// A mutable reference was fetched while pure evaluation forbids it.
    #[error("requested to fetch flake reference '{0}' purely, but it is mutable")]
    PurityViolation(FlakeRef),
    /// An alias reached the fetcher; aliases are never directly fetchable.
    #[error("indirect flake reference '{0}' cannot be fetched")]
    Indirect(FlakeRef),
    /// A local path reference does not contain a `.git` entry.
    #[error("flake '{0}' does not reference a git repository")]
    NotAGitRepo(PathBuf),
    /// The GitHub response carried no `ETag` header.
    #[error("did not receive an ETag header from '{0}'")]
    MissingEtag(String),
    /// The GitHub response's `ETag` header is not a quoted commit hash.
    #[error("ETag header '{etag}' from '{url}' is not a git revision")]
    MalformedEtag {
        /// The header value received.
        etag: String,
        /// The URL it came from.
        url: String,
    },
    /// The downloader failed.
    #[error(transparent)]
    Download(#[from] DownloadError),
    /// The git exporter failed.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// The fetcher, dispatching resolved references to the right transport.
pub struct Fetcher {
    downloader: Box<dyn Downloader>,
    git: Box<dyn GitExporter>,
}

/// A materialized source, with whatever provenance the transport can prove.
#[derive(Debug, Clone)]
pub struct FlakeSourceInfo {
    /// The store path of the fetched tree.
    pub store_path: PathBuf,
    /// The revision the tree corresponds to, when the transport can name one.
    pub rev: Option<Rev>,
    /// The number of commits in the revision's history; never available for
    /// tarball fetches.
    pub rev_count: Option<u64>,
}

/// Downloads a URL into the store with ETag-based caching.
pub trait Downloader: Send + Sync {
    /// Fetches `url`, returning a cached result when it is younger than
    /// `ttl_secs`.
    fn download(
        &self,
        url: &str,
        name: &str,
        ttl_secs: u64,
    ) -> Result<DownloadedTree, DownloadError>;
}

/// Exports a git tree into the store.
pub trait GitExporter: Send + Sync {
    /// Exports `url` at the given `reference` or `rev` (both absent means the
    /// repository's current head) and reports revision and history length.
    fn export(
        &self,
        url: &str,
        reference: Option<&str>,
        rev: Option<&Rev>,
        name: &str,
    ) -> Result<GitExport, GitError>;
}

//================================================================================================
// Impls
//================================================================================================

impl Fetcher {
    /// Builds a fetcher from transport implementations.
    #[must_use]
    pub fn new(downloader: Box<dyn Downloader>, git: Box<dyn GitExporter>) -> Self {
        Fetcher { downloader, git }
    }

    /// Builds the production fetcher from the application configuration.
    pub fn from_config(store: Arc<dyn Store>) -> Result<Self, Error> {
        let cache = config::CONFIG.cache.root.clone();
        let downloader = HttpDownloader::new(cache.clone(), store.clone())?;
        let git = GitCli::new(cache, store);
        Ok(Fetcher::new(Box::new(downloader), Box::new(git)))
    }

    /// Materializes an already resolved reference into the store.
    ///
    /// `pure` enables the purity gate; `impure_allowed` is the single escape
    /// used for the impure top-level fetch.
    pub fn fetch(
        &self,
        flake_ref: &FlakeRef,
        pure: bool,
        impure_allowed: bool,
    ) -> Result<FlakeSourceInfo, Error> {
        if pure && !impure_allowed && !flake_ref.is_immutable() {
            return Err(Error::PurityViolation(flake_ref.clone()));
        }

        match &flake_ref.data {
            FlakeRefData::GitHub { owner, repo } => self.fetch_github(flake_ref, owner, repo),
            FlakeRefData::Git { url } => {
                let info = self.git.export(
                    url,
                    flake_ref.r#ref.as_deref(),
                    flake_ref.rev.as_ref(),
                    "source",
                )?;
                Ok(FlakeSourceInfo {
                    store_path: info.store_path,
                    rev: Some(info.rev),
                    rev_count: Some(info.rev_count),
                })
            },
            FlakeRefData::Path { path } => {
                if !path.join(".git").exists() {
                    return Err(Error::NotAGitRepo(path.clone()));
                }
                let info =
                    self.git
                        .export(&path.to_string_lossy(), None, None, "source")?;
                Ok(FlakeSourceInfo {
                    store_path: info.store_path,
                    rev: Some(info.rev),
                    rev_count: Some(info.rev_count),
                })
            },
            FlakeRefData::Alias { .. } => Err(Error::Indirect(flake_ref.clone())),
        }
    }

    /// Downloads one revision of a GitHub repository as a tarball.
    ///
    /// The revision actually served is recovered from the `ETag` header,
    /// which must be the 40-hex commit hash wrapped in double quotes.
    fn fetch_github(
        &self,
        flake_ref: &FlakeRef,
        owner: &str,
        repo: &str,
    ) -> Result<FlakeSourceInfo, Error> {
        let version = flake_ref
            .rev
            .map(|r| r.to_string())
            .or_else(|| flake_ref.r#ref.clone())
            .unwrap_or_else(|| config::CONFIG.git.default_ref.clone());
        let url = format!(
            "{}/repos/{}/{}/tarball/{}",
            config::CONFIG.github.api_base.trim_end_matches('/'),
            owner,
            repo,
            version
        );

        let ttl = if flake_ref.rev.is_some() {
            IMMUTABLE_TTL
        } else {
            config::CONFIG.fetch.tarball_ttl
        };

        let tree = self.downloader.download(&url, "source", ttl)?;
        let etag = tree.etag.ok_or_else(|| Error::MissingEtag(url.clone()))?;

        let rev = etag
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .filter(|_| etag.len() == 42)
            .and_then(|hash| hash.parse::<Rev>().ok())
            .ok_or_else(|| Error::MalformedEtag {
                etag: etag.clone(),
                url: url.clone(),
            })?;

        Ok(FlakeSourceInfo {
            store_path: tree.store_path,
            rev: Some(rev),
            rev_count: None,
        })
    }
}
