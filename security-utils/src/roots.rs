//! Trust anchors for the standard X.509 validation that runs before pinning.

use std::{fs, io, path::Path};

use rustls::RootCertStore;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RootStoreError {
    #[error("failed reading certificate bundle `{}`", .0.display())]
    Read(std::path::PathBuf, #[source] io::Error),
    #[error("provided cert bytes did not match sha256 hash")]
    ChecksumMismatch,
    #[error("certificate bundle failed to parse")]
    Parse(#[source] io::Error),
    #[error("certificate bundle contained no usable certificates")]
    Empty,
}

/// The Mozilla root program, as shipped by `webpki-roots`.
pub fn webpki_root_store() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Loads the roots from a PEM bundle on disk, or falls back to
/// [`webpki_root_store`] if no bundle is configured.
pub fn load_root_store(
    pem_bundle: Option<&Path>,
    expected_sha256: Option<&[u8; 32]>,
) -> Result<RootCertStore, RootStoreError> {
    let Some(path) = pem_bundle else {
        info!("no root certificate bundle configured, using webpki roots");
        return Ok(webpki_root_store());
    };
    let pem =
        fs::read(path).map_err(|err| RootStoreError::Read(path.to_owned(), err))?;
    root_store_from_pem(&pem, expected_sha256)
}

/// Parses a PEM bundle into a root store, after verifying the bundle against a
/// checksum if one is given.
pub fn root_store_from_pem(
    pem: &[u8],
    expected_sha256: Option<&[u8; 32]>,
) -> Result<RootCertStore, RootStoreError> {
    if let Some(sha256) = expected_sha256 {
        // Verify that the bundle has not been replaced
        let mut context = ring::digest::Context::new(&ring::digest::SHA256);
        context.update(pem);
        let digest = context.finish();
        if digest.as_ref() != sha256 {
            return Err(RootStoreError::ChecksumMismatch);
        }
    }

    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(RootStoreError::Parse)?;
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    if ignored > 0 {
        warn!(ignored, "some certificates in the bundle could not be parsed");
    }
    if added == 0 {
        return Err(RootStoreError::Empty);
    }
    info!(added, "loaded root certificates");

    Ok(store)
}

#[cfg(test)]
mod tests {
    use ring::digest;

    use super::*;
    use crate::pinning::tests::TestCa;

    #[test]
    fn test_pem_bundle_with_matching_checksum() {
        let ca = TestCa::new();
        let pem = ca.cert.pem();
        let sha256: [u8; 32] = digest::digest(&digest::SHA256, pem.as_bytes())
            .as_ref()
            .try_into()
            .unwrap();

        let store = root_store_from_pem(pem.as_bytes(), Some(&sha256)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pem_bundle_with_wrong_checksum() {
        let ca = TestCa::new();
        let err = root_store_from_pem(ca.cert.pem().as_bytes(), Some(&[0; 32]))
            .unwrap_err();
        assert!(matches!(err, RootStoreError::ChecksumMismatch));
    }

    #[test]
    fn test_bundle_without_certificates() {
        let err = root_store_from_pem(b"not a pem file", None).unwrap_err();
        assert!(matches!(err, RootStoreError::Empty));
    }

    #[test]
    fn test_webpki_roots_are_not_empty() {
        assert!(!webpki_root_store().is_empty());
    }
}
