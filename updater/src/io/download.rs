//! Artifact and catalog transport.
//!
//! The [`Downloader`] trait decouples tasks from the transport. Tests use an
//! in-memory map; the CLI uses [`HttpDownloader`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::types::Hash;
use crate::error::UpdateError;
use crate::io::filesystem::Filesystem;

/// Abstraction over artifact transports.
pub trait Downloader {
    /// Fetch the bytes behind `url`. Failures are [`UpdateError::Transport`].
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Fetch `url` into `destination`, replacing any existing file.
    fn fetch_to(&self, url: &str, destination: &Path) -> Result<()> {
        let bytes = self.fetch(url)?;
        Filesystem.write(destination, &bytes)
    }

    /// Fetch an artifact whose content hash is declared by the catalog.
    ///
    /// Implementations may serve cached bytes, but only bytes matching
    /// `expected`. The destination is written even on a mismatch; the caller
    /// checks the hash.
    fn fetch_artifact(&self, url: &str, _expected: Option<&Hash>, destination: &Path) -> Result<()> {
        self.fetch_to(url, destination)
    }
}

/// Downloader for `http(s)://` URLs, `file://` URLs and plain paths.
///
/// With a cache directory, artifacts with a declared hash are stored under the
/// SHA-256 of their URL once their content matches, and served from there
/// while it still matches. Catalogs, signatures and unhashed artifacts are
/// always fetched fresh.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    cache_dir: Option<PathBuf>,
}

impl HttpDownloader {
    pub fn new(timeout: Duration, cache_dir: Option<PathBuf>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client, cache_dir })
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(cache_key(url)))
    }

    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| UpdateError::transport(url, err.to_string()))?;
        let bytes = response
            .bytes()
            .map_err(|err| UpdateError::transport(url, err.to_string()))?
            .to_vec();
        Ok(bytes)
    }
}

impl Downloader for HttpDownloader {
    #[instrument(skip(self))]
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if is_remote(url) {
            return self.fetch_remote(url);
        }
        let path = local_path(url);
        debug!(path = %path.display(), "reading local artifact");
        let bytes = fs::read(&path).map_err(|err| UpdateError::transport(url, err.to_string()))?;
        Ok(bytes)
    }

    #[instrument(skip(self, expected, destination))]
    fn fetch_artifact(&self, url: &str, expected: Option<&Hash>, destination: &Path) -> Result<()> {
        let (Some(hash), Some(cached)) = (expected, self.cache_path(url)) else {
            return self.fetch_to(url, destination);
        };

        if Filesystem.exists(&cached) {
            let bytes = Filesystem.read(&cached)?;
            if hash.verify(&bytes) {
                debug!(cache = %cached.display(), "serving from cache");
                return Filesystem.write(destination, &bytes);
            }
            warn!(cache = %cached.display(), "cached artifact no longer matches its hash, evicting");
            Filesystem.remove_file(&cached)?;
        }

        let bytes = self.fetch(url)?;
        if hash.verify(&bytes) {
            Filesystem.write_atomic(&cached, &bytes)?;
        }
        Filesystem.write(destination, &bytes)
    }
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn local_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

fn cache_key(url: &str) -> String {
    crate::core::hash::hex_digest(crate::core::types::HashType::Sha256, url.as_bytes())
}

/// Resolve `reference` against the location of the document that contains it.
///
/// Absolute URLs and absolute paths are returned unchanged; relative ones are
/// joined to the directory part of `base`.
pub fn resolve_location(base: &str, reference: &str) -> String {
    if reference.contains("://") || Path::new(reference).is_absolute() {
        return reference.to_string();
    }
    match base.rfind('/') {
        Some(idx) => format!("{}/{}", &base[..idx], reference.trim_start_matches("./")),
        None => reference.to_string(),
    }
}
