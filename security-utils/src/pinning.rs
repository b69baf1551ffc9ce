//! Certificate pinning decisions.
//!
//! Pinning is opt-in per host. Hosts without a pinned signature are left to the
//! default platform validation, while a pinned host is only trusted if its chain
//! passes standard X.509 validation *and* the leaf certificate's signature value is
//! byte-for-byte identical to the pinned one.

use std::{collections::HashMap, fmt, sync::Arc};

use rustls::{
    client::{WebPkiServerVerifier, danger::ServerCertVerifier as _},
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tracing::{debug, info, warn};
use x509_parser::{certificate::X509Certificate, prelude::FromDer as _};

/// The outcome of evaluating a single authentication challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// The server is trusted, proceed with the connection.
    UseCredential,
    /// The server is not trusted, abort the connection.
    CancelChallenge,
    /// Pinning does not apply, defer to the default validation.
    DefaultHandling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMethod {
    ServerTrust,
    ClientCertificate,
    Other,
}

/// A single authentication challenge raised during a handshake.
#[derive(Debug, Clone)]
pub struct ServerChallenge<'a> {
    pub host: &'a str,
    pub method: AuthenticationMethod,
    /// The presented chain, leaf first.
    pub chain: Vec<CertificateDer<'a>>,
}

impl<'a> ServerChallenge<'a> {
    pub fn server_trust(host: &'a str, chain: Vec<CertificateDer<'a>>) -> Self {
        Self {
            host,
            method: AuthenticationMethod::ServerTrust,
            chain,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PinningConfigError {
    #[error("host `{0}` has more than one pinned signature")]
    DuplicateHost(String),
    #[error("pinned signature for host `{host}` is not valid hex")]
    InvalidHex {
        host: String,
        #[source]
        source: hex::FromHexError,
    },
    #[error("pinned signature for host `{0}` is empty")]
    EmptySignature(String),
}

/// Expected leaf certificate signatures, keyed by host name.
///
/// Host names are compared case-insensitively. There is at most one signature per
/// host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinnedSignatures(HashMap<String, Vec<u8>>);

impl PinnedSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the pins from `(host, hex signature)` pairs. Colons and whitespace in
    /// the hex string are ignored, so `openssl x509 -text` output can be pasted
    /// as-is.
    pub fn from_hex<I, H, S>(entries: I) -> Result<Self, PinningConfigError>
    where
        I: IntoIterator<Item = (H, S)>,
        H: AsRef<str>,
        S: AsRef<str>,
    {
        let mut pins = Self::new();
        for (host, signature) in entries {
            let host = host.as_ref();
            let cleaned: String = signature
                .as_ref()
                .chars()
                .filter(|c| *c != ':' && !c.is_whitespace())
                .collect();
            let decoded = hex::decode(&cleaned).map_err(|source| {
                PinningConfigError::InvalidHex {
                    host: host.to_owned(),
                    source,
                }
            })?;
            pins.insert(host, decoded)?;
        }
        Ok(pins)
    }

    pub fn insert(
        &mut self,
        host: &str,
        signature: Vec<u8>,
    ) -> Result<(), PinningConfigError> {
        if signature.is_empty() {
            return Err(PinningConfigError::EmptySignature(host.to_owned()));
        }
        let key = host.to_ascii_lowercase();
        if self.0.contains_key(&key) {
            return Err(PinningConfigError::DuplicateHost(key));
        }
        self.0.insert(key, signature);
        Ok(())
    }

    pub fn signature_for(&self, host: &str) -> Option<&[u8]> {
        self.0.get(&host.to_ascii_lowercase()).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BaselineTrustError {
    #[error("certificate chain was empty")]
    EmptyChain,
    #[error("`{0}` is not a valid server name")]
    InvalidServerName(String),
    #[error("chain failed standard validation: {0}")]
    Rejected(#[from] rustls::Error),
}

/// Standard X.509 path validation, isolated so that pinning can be tested with
/// synthetic chains.
pub trait BaselineTrust: Send + Sync + fmt::Debug {
    /// Validates `chain` (leaf first) for `host`.
    fn evaluate(
        &self,
        chain: &[CertificateDer<'_>],
        host: &str,
    ) -> Result<(), BaselineTrustError>;
}

/// [`BaselineTrust`] backed by the webpki verifier that rustls uses by default.
#[derive(Debug, Clone)]
pub struct WebPkiBaseline {
    verifier: Arc<WebPkiServerVerifier>,
}

impl WebPkiBaseline {
    pub fn new(verifier: Arc<WebPkiServerVerifier>) -> Self {
        Self { verifier }
    }
}

impl BaselineTrust for WebPkiBaseline {
    fn evaluate(
        &self,
        chain: &[CertificateDer<'_>],
        host: &str,
    ) -> Result<(), BaselineTrustError> {
        let (leaf, intermediates) =
            chain.split_first().ok_or(BaselineTrustError::EmptyChain)?;
        let server_name = ServerName::try_from(host)
            .map_err(|_| BaselineTrustError::InvalidServerName(host.to_owned()))?;
        self.verifier.verify_server_cert(
            leaf,
            intermediates,
            &server_name,
            &[],
            UnixTime::now(),
        )?;
        Ok(())
    }
}

/// Decides whether a presented certificate chain is trusted for a host.
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    pins: Arc<PinnedSignatures>,
    baseline: Arc<dyn BaselineTrust>,
}

impl CertificateValidator {
    pub fn new(pins: PinnedSignatures, baseline: Arc<dyn BaselineTrust>) -> Self {
        Self {
            pins: Arc::new(pins),
            baseline,
        }
    }

    pub fn pins(&self) -> &PinnedSignatures {
        &self.pins
    }

    /// Evaluates a challenge exactly once. Errors from the baseline evaluation are
    /// treated as a failure, never as success.
    pub fn evaluate(&self, challenge: &ServerChallenge<'_>) -> TrustDecision {
        let host = challenge.host;
        let Some(expected) = self.pins.signature_for(host) else {
            debug!(host, "no pinned signature, deferring to default handling");
            return TrustDecision::DefaultHandling;
        };
        if challenge.method != AuthenticationMethod::ServerTrust {
            debug!(host, method = ?challenge.method, "not a server trust challenge");
            return TrustDecision::DefaultHandling;
        }

        if let Err(err) = self.baseline.evaluate(&challenge.chain, host) {
            warn!(host, %err, "server trust evaluation failed");
            return TrustDecision::CancelChallenge;
        }
        let Some(leaf) = challenge.chain.first() else {
            warn!(host, "server presented no certificates");
            return TrustDecision::CancelChallenge;
        };
        let Some(presented) = certificate_signature(leaf) else {
            warn!(host, "failed to read the signature of the leaf certificate");
            return TrustDecision::CancelChallenge;
        };
        if presented != expected {
            warn!(
                host,
                presented = %hex::encode(&presented),
                "leaf certificate signature does not match the pinned signature"
            );
            return TrustDecision::CancelChallenge;
        }

        info!(host, "leaf certificate matches pinned signature");
        TrustDecision::UseCredential
    }
}

/// Extracts the signature value of a DER encoded certificate.
pub fn certificate_signature(der: &CertificateDer<'_>) -> Option<Vec<u8>> {
    match X509Certificate::from_der(der.as_ref()) {
        Ok((_, cert)) => Some(cert.signature_value.data.to_vec()),
        Err(err) => {
            debug!(%err, "certificate is not valid x509");
            None
        }
    }
}
