//! The concrete handlers that turn an export response into a [`VerifiedExport`].

use std::{io::Read as _, sync::Arc};

use en_ingest_agent_core::{
    ArchiveContents, Artifact, HandlerChain, HandlerError, ResponseHandler, TrustedKeys,
    VerifiedExport,
    artifact::{EXPORT_BIN, EXPORT_HEADER, EXPORT_SIG, split_header},
    signatures,
};
use en_security_utils::NetworkResponse;
use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::cache::DiskCache;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ARCHIVE_CONTENT_TYPES: &[&str] = &[
    "application/gzip",
    "application/x-gzip",
    "application/tar",
    "application/x-tar",
    "application/x-gtar",
    "application/tar+gzip",
];

#[derive(Debug, Clone)]
pub enum ExportHandler {
    /// Substitutes the cached bundle for the response body.
    ReadFromDisk { cache: DiskCache, prefer_cache: bool },
    /// Unpacks a (gzipped) tar bundle.
    ExtractArchive { max_unpacked_size: u64 },
    /// Checks `export.sig` over `export.bin`. Must run last.
    VerifySignature { keys: Arc<TrustedKeys> },
}

impl ExportHandler {
    /// Name of [`ExportHandler::ReadFromDisk`] in a [`ChainOutcome`].
    pub const READ_FROM_DISK: &'static str = "read_from_disk";

    /// Disk read, then extraction, then signature verification.
    pub fn canonical_chain(
        cache: DiskCache,
        prefer_cache: bool,
        max_unpacked_size: u64,
        keys: Arc<TrustedKeys>,
    ) -> HandlerChain<ExportHandler> {
        HandlerChain::new(vec![
            ExportHandler::ReadFromDisk {
                cache,
                prefer_cache,
            },
            ExportHandler::ExtractArchive { max_unpacked_size },
            ExportHandler::VerifySignature { keys },
        ])
    }
}

impl ResponseHandler for ExportHandler {
    type Input = Artifact;
    type Output = Artifact;

    fn name(&self) -> &'static str {
        match self {
            ExportHandler::ReadFromDisk { .. } => Self::READ_FROM_DISK,
            ExportHandler::ExtractArchive { .. } => "extract_archive",
            ExportHandler::VerifySignature { .. } => "verify_signature",
        }
    }

    fn is_applicable(&self, response: &NetworkResponse, input: &Artifact) -> bool {
        match self {
            ExportHandler::ReadFromDisk {
                cache,
                prefer_cache,
            } => {
                (response.is_not_modified() || *prefer_cache)
                    && cache.contains(&response.url)
            }
            ExportHandler::ExtractArchive { .. } => {
                let Artifact::Bytes(bytes) = input else {
                    return false;
                };
                bytes.starts_with(&GZIP_MAGIC)
                    || response
                        .content_type()
                        .is_some_and(|ct| ARCHIVE_CONTENT_TYPES.contains(&ct))
            }
            ExportHandler::VerifySignature { .. } => !input.is_verified(),
        }
    }

    fn process(
        &self,
        response: &NetworkResponse,
        input: Artifact,
    ) -> Result<Artifact, HandlerError> {
        match self {
            ExportHandler::ReadFromDisk { cache, .. } => {
                let bytes =
                    cache
                        .read(&response.url)
                        .map_err(|source| HandlerError::CacheRead {
                            url: response.url.to_string(),
                            source,
                        })?;
                info!(url = %response.url, bytes = bytes.len(), "using cached bundle");
                Ok(Artifact::Bytes(bytes))
            }
            ExportHandler::ExtractArchive { max_unpacked_size } => match input {
                Artifact::Bytes(bytes) => {
                    extract(&bytes, *max_unpacked_size).map(Artifact::Unpacked)
                }
                other => Ok(other),
            },
            ExportHandler::VerifySignature { keys } => match input {
                Artifact::Bytes(_) => Err(HandlerError::MissingMember(EXPORT_SIG)),
                Artifact::Unpacked(contents) => verify(&contents, keys).map(Artifact::Verified),
                verified @ Artifact::Verified(_) => Ok(verified),
            },
        }
    }
}

fn extract(bytes: &[u8], limit: u64) -> Result<ArchiveContents, HandlerError> {
    let reader: Box<dyn std::io::Read + '_> = if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    let mut archive = tar::Archive::new(reader);

    let mut contents = ArchiveContents::new();
    let mut total: u64 = 0;
    for entry in archive.entries().map_err(HandlerError::Decompression)? {
        let entry = entry.map_err(HandlerError::Decompression)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(HandlerError::Decompression)?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_owned();
        let size = entry.size();
        total = total.saturating_add(size);
        if total > limit {
            return Err(HandlerError::ArchiveTooLarge { limit });
        }

        let mut data = Vec::with_capacity(usize::try_from(size).unwrap_or_default());
        // The header size is not trusted, the read is bounded as well.
        entry
            .take(size)
            .read_to_end(&mut data)
            .map_err(HandlerError::Decompression)?;
        debug!(name, bytes = data.len(), "extracted archive member");
        contents.insert(name, data);
    }

    Ok(contents)
}

fn verify(
    contents: &ArchiveContents,
    keys: &TrustedKeys,
) -> Result<VerifiedExport, HandlerError> {
    let payload = contents
        .get(EXPORT_BIN)
        .ok_or(HandlerError::MissingMember(EXPORT_BIN))?;
    let signature = contents
        .get(EXPORT_SIG)
        .ok_or(HandlerError::MissingMember(EXPORT_SIG))?;

    let signing_key = signatures::verify(payload, signature, keys)?;
    let (header, body) = split_header(payload)
        .ok_or_else(|| HandlerError::UnsupportedHeader(String::new()))?;
    if header != EXPORT_HEADER {
        return Err(HandlerError::UnsupportedHeader(header));
    }
    info!(
        key = %hex::encode(signing_key.as_bytes()),
        bytes = body.len(),
        "export signature verified"
    );

    Ok(VerifiedExport {
        header,
        body,
        signing_key,
    })
}
