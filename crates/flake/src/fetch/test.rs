use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::flakeref::FlakeRef;

const REV: &str = "0123456789abcdef0123456789abcdef01234567";

/// Records requested URLs and serves a fixed tree with a fixed ETag.
struct FakeDownloader {
    calls: Mutex<Vec<String>>,
    etag: Option<String>,
    tree: PathBuf,
}

impl Downloader for FakeDownloader {
    fn download(
        &self,
        url: &str,
        _name: &str,
        _ttl_secs: u64,
    ) -> Result<DownloadedTree, DownloadError> {
        self.calls.lock().unwrap().push(url.to_owned());
        Ok(DownloadedTree {
            store_path: self.tree.clone(),
            etag: self.etag.clone(),
        })
    }
}

/// Records whether it was invoked and serves a fixed export.
struct FakeGit {
    called: AtomicBool,
    tree: PathBuf,
}

impl GitExporter for FakeGit {
    fn export(
        &self,
        _url: &str,
        _reference: Option<&str>,
        rev: Option<&crate::flakeref::Rev>,
        _name: &str,
    ) -> Result<GitExport, GitError> {
        self.called.store(true, Ordering::SeqCst);
        Ok(GitExport {
            store_path: self.tree.clone(),
            rev: rev.copied().unwrap_or_else(|| REV.parse().unwrap()),
            rev_count: 7,
        })
    }
}

fn make_fetcher(dir: &Path, etag: Option<&str>) -> (Fetcher, &'static FakeDownloader) {
    let downloader: &'static FakeDownloader = Box::leak(Box::new(FakeDownloader {
        calls: Mutex::new(Vec::new()),
        etag: etag.map(str::to_owned),
        tree: dir.to_owned(),
    }));
    let git = FakeGit {
        called: AtomicBool::new(false),
        tree: dir.to_owned(),
    };
    (
        Fetcher::new(Box::new(SharedDownloader(downloader)), Box::new(git)),
        downloader,
    )
}

/// Lets the test keep a handle on the downloader the fetcher owns.
struct SharedDownloader(&'static FakeDownloader);

impl Downloader for SharedDownloader {
    fn download(
        &self,
        url: &str,
        name: &str,
        ttl_secs: u64,
    ) -> Result<DownloadedTree, DownloadError> {
        self.0.download(url, name, ttl_secs)
    }
}

#[test]
fn github_rev_builds_the_tarball_url() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (fetcher, downloader) = make_fetcher(dir.path(), Some(&format!("\"{REV}\"")));

    let flake_ref: FlakeRef = format!("github:alice/proj?rev={REV}").parse()?;
    let info = fetcher.fetch(&flake_ref, false, false)?;

    let calls = downloader.calls.lock().unwrap();
    assert_eq!(
        calls.as_slice(),
        [format!(
            "https://api.github.com/repos/alice/proj/tarball/{REV}"
        )]
    );
    assert_eq!(info.rev.map(|r| r.to_string()).as_deref(), Some(REV));
    assert_eq!(info.rev_count, None);
    Ok(())
}

#[test]
fn github_ref_and_default_branch_urls() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (fetcher, downloader) = make_fetcher(dir.path(), Some(&format!("\"{REV}\"")));

    fetcher.fetch(&"github:alice/proj/unstable".parse()?, false, false)?;
    fetcher.fetch(&"github:alice/proj".parse()?, false, false)?;

    let calls = downloader.calls.lock().unwrap();
    assert_eq!(
        calls.as_slice(),
        [
            "https://api.github.com/repos/alice/proj/tarball/unstable".to_owned(),
            "https://api.github.com/repos/alice/proj/tarball/master".to_owned(),
        ]
    );
    Ok(())
}

#[test]
fn the_etag_is_the_revision() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let (fetcher, _) = make_fetcher(dir.path(), None);
    let err = fetcher
        .fetch(&"github:alice/proj".parse()?, false, false)
        .unwrap_err();
    assert!(matches!(err, Error::MissingEtag(_)));

    let (fetcher, _) = make_fetcher(dir.path(), Some("W/\"weak-validator\""));
    let err = fetcher
        .fetch(&"github:alice/proj".parse()?, false, false)
        .unwrap_err();
    assert!(matches!(err, Error::MalformedEtag { .. }));

    // unquoted, right length
    let (fetcher, _) = make_fetcher(dir.path(), Some(&format!("x{REV}x")));
    let err = fetcher
        .fetch(&"github:alice/proj".parse()?, false, false)
        .unwrap_err();
    assert!(matches!(err, Error::MalformedEtag { .. }));
    Ok(())
}

#[test]
fn pure_mode_rejects_mutable_references_before_any_fetch() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (fetcher, downloader) = make_fetcher(dir.path(), Some(&format!("\"{REV}\"")));

    let mutable: FlakeRef = "github:alice/proj".parse()?;
    let err = fetcher.fetch(&mutable, true, false).unwrap_err();
    assert!(matches!(err, Error::PurityViolation(_)));
    assert!(err.to_string().contains("github:alice/proj"));
    assert!(downloader.calls.lock().unwrap().is_empty());

    // the impure top-level escape hatch lifts the gate
    fetcher.fetch(&mutable, true, true)?;
    assert_eq!(downloader.calls.lock().unwrap().len(), 1);

    // immutable references are always allowed
    fetcher.fetch(&format!("github:alice/proj?rev={REV}").parse()?, true, false)?;
    Ok(())
}

#[test]
fn path_references_must_be_git_checkouts() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (fetcher, _) = make_fetcher(dir.path(), None);

    let plain = dir.path().join("plain");
    fs::create_dir_all(&plain)?;
    let err = fetcher
        .fetch(&FlakeRef::path(&plain), false, false)
        .unwrap_err();
    assert!(matches!(err, Error::NotAGitRepo(_)));

    let checkout = dir.path().join("checkout");
    fs::create_dir_all(checkout.join(".git"))?;
    let info = fetcher.fetch(&FlakeRef::path(&checkout), false, false)?;
    assert_eq!(info.rev_count, Some(7));
    assert!(info.rev.is_some());
    Ok(())
}

#[test]
fn aliases_cannot_be_fetched() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (fetcher, _) = make_fetcher(dir.path(), None);
    let err = fetcher
        .fetch(&"nixpkgs".parse()?, false, false)
        .unwrap_err();
    assert!(matches!(err, Error::Indirect(_)));
    Ok(())
}
