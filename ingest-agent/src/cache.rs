//! On-disk cache of raw export bundles, keyed by URL.
//!
//! Entries are the bytes exactly as the server sent them, together with the entity
//! tag of the response, so that the next fetch can be conditional. Cached bytes are
//! never trusted: they go through the same handler chain as a fresh response.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use sha2::{Digest as _, Sha256};
use tracing::debug;
use url::Url;

use crate::util::write_atomically;

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_stem(&self, url: &Url) -> PathBuf {
        let digest = Sha256::digest(url.as_str().as_bytes());
        self.root.join(hex::encode(digest))
    }

    fn body_path(&self, url: &Url) -> PathBuf {
        self.entry_stem(url).with_extension("bin")
    }

    fn etag_path(&self, url: &Url) -> PathBuf {
        self.entry_stem(url).with_extension("etag")
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.body_path(url).is_file()
    }

    pub fn read(&self, url: &Url) -> io::Result<Bytes> {
        fs::read(self.body_path(url)).map(Bytes::from)
    }

    /// The entity tag of the cached response, if there is a cached body.
    pub fn etag(&self, url: &Url) -> Option<String> {
        if !self.contains(url) {
            return None;
        }
        fs::read_to_string(self.etag_path(url))
            .ok()
            .map(|etag| etag.trim().to_owned())
            .filter(|etag| !etag.is_empty())
    }

    /// Replaces the entry for `url`.
    pub fn write(&self, url: &Url, body: &[u8], etag: Option<&str>) -> io::Result<()> {
        // Drop the old etag first, a stale etag must never pair with a new body.
        match fs::remove_file(self.etag_path(url)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
            _ => (),
        }
        write_atomically(&self.root, &self.body_path(url), body)?;
        if let Some(etag) = etag {
            write_atomically(&self.root, &self.etag_path(url), etag.as_bytes())?;
        }
        debug!(%url, bytes = body.len(), "cached response");

        Ok(())
    }
}
