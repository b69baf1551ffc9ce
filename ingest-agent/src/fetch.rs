//! Fetching an export: pinned transport, then the handler chain, then disk.
//!
//! Nothing is written to the exports directory before the chain produced a verified
//! export, and the raw bundle is only cached after that.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use en_ingest_agent_core::{Artifact, HandlerChain, HandlerError, TrustedKeys, VerifiedExport};
use en_security_utils::{
    NetworkResponse,
    reqwest::{PinnedTransport, TransportError},
};
use http::header::ETAG;
use sha2::{Digest as _, Sha256};
use tracing::{info, instrument, warn};
use url::Url;

use crate::{cache::DiskCache, handlers::ExportHandler, util::write_atomically};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed processing response from `{url}`")]
    Handler {
        url: Url,
        #[source]
        source: HandlerError,
    },
    #[error("failed creating exports directory `{}`", .0.display())]
    CreateExportsDir(PathBuf, #[source] io::Error),
    #[error("failed writing verified export to `{}`", .0.display())]
    WriteExport(PathBuf, #[source] io::Error),
}

/// Where a fetch left its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredExport {
    pub path: PathBuf,
    pub from_cache: bool,
}

/// Runs responses through the export handler chain and persists the verified result.
#[derive(Debug, Clone)]
pub struct ExportPipeline {
    cache: DiskCache,
    chain: Arc<HandlerChain<ExportHandler>>,
    exports: PathBuf,
}

impl ExportPipeline {
    pub fn new(
        cache: DiskCache,
        exports: impl Into<PathBuf>,
        prefer_cache: bool,
        max_unpacked_size: u64,
        keys: Arc<TrustedKeys>,
    ) -> Result<Self, FetchError> {
        let exports = exports.into();
        fs::create_dir_all(&exports)
            .map_err(|err| FetchError::CreateExportsDir(exports.clone(), err))?;
        let chain = ExportHandler::canonical_chain(
            cache.clone(),
            prefer_cache,
            max_unpacked_size,
            keys,
        );
        Ok(Self {
            cache,
            chain: Arc::new(chain),
            exports,
        })
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Verifies `response` and writes the export. Only a [`Artifact::Verified`] chain
    /// result is ever written.
    pub fn ingest(&self, response: &NetworkResponse) -> Result<StoredExport, FetchError> {
        let handler_err = |source| FetchError::Handler {
            url: response.url.clone(),
            source,
        };
        let outcome = self
            .chain
            .run_traced(response, Artifact::Bytes(response.body.clone()))
            .map_err(handler_err)?;
        let from_cache = outcome.ran(ExportHandler::READ_FROM_DISK);
        let export = match outcome.value {
            Artifact::Verified(export) => export,
            other => return Err(handler_err(HandlerError::Unverified(other.kind()))),
        };

        let path = self.exports.join(export_file_name(&response.url));
        write_export(&self.exports, &path, &export)?;

        if !from_cache {
            let etag = response.headers.get(ETAG).and_then(|v| v.to_str().ok());
            if let Err(err) = self.cache.write(&response.url, &response.body, etag) {
                // The export is already stored, a stale cache only costs a download.
                warn!(url = %response.url, %err, "failed caching response");
            }
        }
        info!(url = %response.url, path = %path.display(), from_cache, "stored verified export");

        Ok(StoredExport { path, from_cache })
    }
}

fn write_export(dir: &Path, path: &Path, export: &VerifiedExport) -> Result<(), FetchError> {
    write_atomically(dir, path, &export.to_payload())
        .map_err(|err| FetchError::WriteExport(path.to_owned(), err))
}

/// A file name unique to `url`: a readable prefix from the last path segment and the
/// sha256 of the full URL, e.g. `exposurekeyset-<hex>.bin` for
/// `.../exposurekeyset.tar.gz`.
pub fn export_file_name(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("export");
    let stem = segment.split('.').next().unwrap_or(segment);
    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = hex::encode(Sha256::digest(url.as_str().as_bytes()));
    format!("{sanitized}-{digest}.bin")
}

/// Fetches exports over a [`PinnedTransport`] and hands them to an [`ExportPipeline`].
#[derive(Debug, Clone)]
pub struct ExportFetcher {
    transport: PinnedTransport,
    pipeline: ExportPipeline,
}

impl ExportFetcher {
    pub fn new(transport: PinnedTransport, pipeline: ExportPipeline) -> Self {
        Self {
            transport,
            pipeline,
        }
    }

    /// Dropping the returned future aborts the fetch without writing anything.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: Url) -> Result<StoredExport, FetchError> {
        let etag = self.pipeline.cache().etag(&url);
        let response = self.transport.get(url, etag.as_deref()).await?;
        self.pipeline.ingest(&response)
    }
}
