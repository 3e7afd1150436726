//! The HTTP downloader, with ETag-based caching.
//!
//! Every successful download records the response's `ETag` and the resulting
//! store path in a small metadata file under the cache directory, keyed by a
//! digest of the URL. Within the caller-supplied TTL the recorded result is
//! served without touching the network; after that a conditional request is
//! sent and a `304 Not Modified` merely refreshes the record.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{DownloadedTree, Downloader};
use crate::json;
use crate::store::{Store, StoreError};

//================================================================================================
// Types
//================================================================================================

/// An error encountered while downloading.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The HTTP request itself failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The server answered with an unexpected status.
    #[error("'{url}' returned HTTP status {status}")]
    Status {
        /// The requested URL.
        url: String,
        /// The status received.
        status: reqwest::StatusCode,
    },
    /// An I/O failure while unpacking or caching.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Inserting the unpacked tree into the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The cache metadata could not be encoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The production [`Downloader`], backed by a blocking HTTP client.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
    store: Arc<dyn Store>,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    etag: Option<String>,
    store_path: PathBuf,
    fetched_at: u64,
}

//================================================================================================
// Impls
//================================================================================================

impl HttpDownloader {
    /// Builds a downloader caching under `cache_dir` and inserting into
    /// `store`.
    pub fn new(cache_dir: PathBuf, store: Arc<dyn Store>) -> Result<Self, DownloadError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("floc/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpDownloader {
            client,
            cache_dir,
            store,
        })
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let key = blake3::hash(url.as_bytes()).to_hex();
        self.cache_dir
            .join("downloads")
            .join(format!("{}.json", &key.as_str()[..32]))
    }

    fn read_entry(&self, url: &str) -> Option<CacheEntry> {
        let text = fs::read_to_string(self.entry_path(url)).ok()?;
        let entry: CacheEntry = serde_json::from_str(&text).ok()?;
        self.store.assert_store_path(&entry.store_path).ok()?;
        Some(entry)
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<(), DownloadError> {
        let bytes = json::to_vec_pretty(entry)?;
        json::write_atomic(&self.entry_path(&entry.url), &bytes)?;
        Ok(())
    }

    /// Unpacks a gzipped tarball into the store, stripping the single
    /// top-level directory GitHub archives wrap their contents in.
    fn unpack(&self, bytes: &[u8], name: &str) -> Result<PathBuf, DownloadError> {
        fs::create_dir_all(&self.cache_dir)?;
        let scratch = tempfile::tempdir_in(&self.cache_dir)?;
        let decoder = flate2::read::GzDecoder::new(bytes);
        tar::Archive::new(decoder).unpack(scratch.path())?;

        let mut entries = fs::read_dir(scratch.path())?
            .collect::<Result<Vec<_>, _>>()?;
        let source = if entries.len() == 1 && entries[0].file_type()?.is_dir() {
            entries.remove(0).path()
        } else {
            scratch.path().to_owned()
        };

        Ok(self.store.add_path(&source, name)?)
    }
}

impl Downloader for HttpDownloader {
    fn download(
        &self,
        url: &str,
        name: &str,
        ttl_secs: u64,
    ) -> Result<DownloadedTree, DownloadError> {
        let cached = self.read_entry(url);

        if let Some(entry) = &cached {
            if now().saturating_sub(entry.fetched_at) < ttl_secs {
                tracing::debug!(url, "download cache hit");
                return Ok(DownloadedTree {
                    store_path: entry.store_path.clone(),
                    etag: entry.etag.clone(),
                });
            }
        }

        let mut request = self.client.get(url);
        if let Some(etag) = cached.as_ref().and_then(|e| e.etag.as_deref()) {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        tracing::info!(url, "downloading");
        let response = request.send()?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            if let Some(mut entry) = cached {
                tracing::debug!(url, "not modified, refreshing cache entry");
                entry.fetched_at = now();
                self.write_entry(&entry)?;
                return Ok(DownloadedTree {
                    store_path: entry.store_path,
                    etag: entry.etag,
                });
            }
        }
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_owned(),
                status: response.status(),
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes()?;
        let store_path = self.unpack(bytes.as_ref(), name)?;

        let entry = CacheEntry {
            url: url.to_owned(),
            etag: etag.clone(),
            store_path: store_path.clone(),
            fetched_at: now(),
        };
        self.write_entry(&entry)?;

        Ok(DownloadedTree { store_path, etag })
    }
}

//================================================================================================
// Functions
//================================================================================================

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
