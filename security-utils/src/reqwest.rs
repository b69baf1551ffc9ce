//! An HTTPS client that consults the [`CertificateValidator`] on every handshake.

use std::{error::Error as StdError, io, sync::Arc, time::Duration};

use reqwest::{Client, StatusCode, header::IF_NONE_MATCH, redirect};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore,
    SignatureScheme,
    client::{
        VerifierBuilderError, WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tracing::{error, info};
use url::Url;

pub use reqwest;

use crate::{
    NetworkResponse,
    pinning::{
        CertificateValidator, PinnedSignatures, ServerChallenge, TrustDecision,
        WebPkiBaseline,
    },
};

const APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server's certificate was rejected by pinning. Retrying with the same pins
    /// fails the same way.
    #[error("certificate pinning failed for host `{host}`")]
    CertificatePinningFailed { host: String },
    #[error("failed building the webpki verifier")]
    BuildVerifier(#[source] VerifierBuilderError),
    #[error("failed building the tls client config")]
    BuildTlsConfig(#[source] rustls::Error),
    #[error("failed initializing HTTP client")]
    BuildClient(#[source] reqwest::Error),
    #[error("request to `{0}` failed")]
    Request(Url, #[source] reqwest::Error),
    #[error("request to `{0}` returned status code `{1}`, expected 2xx or 304")]
    Status(Url, StatusCode),
    #[error("failed retrieving the response body of `{0}`")]
    Body(Url, #[source] reqwest::Error),
}

impl TransportError {
    /// Whether retrying the same request can possibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Request(..) | Self::Body(..) => true,
            Self::Status(_, status) => status.is_server_error(),
            _ => false,
        }
    }
}

/// Server certificate verifier that routes every handshake through a
/// [`CertificateValidator`].
///
/// Hosts without a pin fall back to the standard webpki verifier. Decisions are
/// never cached, each handshake is evaluated for its own server name.
#[derive(Debug)]
pub struct PinningVerifier {
    validator: CertificateValidator,
    fallback: Arc<WebPkiServerVerifier>,
}

impl PinningVerifier {
    pub fn new(
        validator: CertificateValidator,
        fallback: Arc<WebPkiServerVerifier>,
    ) -> Self {
        Self {
            validator,
            fallback,
        }
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let host = server_name.to_str();
        let mut chain = Vec::with_capacity(1 + intermediates.len());
        chain.push(CertificateDer::from(end_entity.as_ref()));
        chain.extend(intermediates.iter().map(|c| CertificateDer::from(c.as_ref())));
        match self
            .validator
            .evaluate(&ServerChallenge::server_trust(&host, chain))
        {
            TrustDecision::UseCredential => Ok(ServerCertVerified::assertion()),
            TrustDecision::DefaultHandling => self.fallback.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ),
            TrustDecision::CancelChallenge => Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.fallback.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.fallback.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.fallback.supported_verify_schemes()
    }
}

/// A builder for configuring and constructing a [`PinnedTransport`].
///
/// HTTPS-only, TLS 1.3 and disabled redirects are not configurable.
#[derive(Debug)]
pub struct PinnedTransportBuilder {
    pins: PinnedSignatures,
    roots: RootCertStore,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl PinnedTransportBuilder {
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<PinnedTransport, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let webpki = WebPkiServerVerifier::builder_with_provider(
            Arc::new(self.roots),
            provider.clone(),
        )
        .build()
        .map_err(TransportError::BuildVerifier)?;
        let validator = CertificateValidator::new(
            self.pins,
            Arc::new(WebPkiBaseline::new(webpki.clone())),
        );
        let verifier = PinningVerifier::new(validator, webpki);

        let tls = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(TransportError::BuildTlsConfig)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        let mut builder = Client::builder()
            .use_preconfigured_tls(tls)
            .https_only(true)
            .redirect(redirect::Policy::none())
            .user_agent(self.user_agent.as_deref().unwrap_or(APP_USER_AGENT));
        if let Some(t) = self.timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().map_err(TransportError::BuildClient)?;

        Ok(PinnedTransport { client })
    }
}

/// HTTPS client whose handshakes are subject to certificate pinning.
#[derive(Debug, Clone)]
pub struct PinnedTransport {
    client: Client,
}

impl PinnedTransport {
    pub fn builder(pins: PinnedSignatures, roots: RootCertStore) -> PinnedTransportBuilder {
        PinnedTransportBuilder {
            pins,
            roots,
            timeout: None,
            user_agent: None,
        }
    }

    /// Fetches `url`, sending `If-None-Match` when an entity tag is given.
    ///
    /// Both `2xx` and `304 Not Modified` responses are returned. Dropping the future
    /// cancels the request.
    #[tracing::instrument(skip_all, fields(url = %url))]
    pub async fn get(
        &self,
        url: Url,
        etag: Option<&str>,
    ) -> Result<NetworkResponse, TransportError> {
        let mut request = self.client.get(url.clone());
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|err| {
            if is_pinning_rejection(&err) {
                let host = url.host_str().unwrap_or_default().to_owned();
                error!(%host, "server certificate rejected by pinning");
                TransportError::CertificatePinningFailed { host }
            } else {
                error!(error = ?err, "HTTP request failed");
                TransportError::Request(url.clone(), err)
            }
        })?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            error!(%status, "HTTP request did not succeed");
            return Err(TransportError::Status(url, status));
        }
        info!(%status, "HTTP request succeeded");

        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Body(url, err))?;

        Ok(NetworkResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

/// Walks the source chain looking for the error our verifier returns on
/// [`TrustDecision::CancelChallenge`].
///
/// `io::Error` does not report its payload as a source, so it is unwrapped by hand.
fn is_pinning_rejection(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        )) = err.downcast_ref::<rustls::Error>()
        {
            return true;
        }
        if let Some(inner) = err.downcast_ref::<io::Error>().and_then(io::Error::get_ref)
        {
            if is_pinning_rejection(inner) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read as _, Write as _},
        net::TcpListener,
    };

    use rustls::pki_types::PrivateKeyDer;
    use test_log::test;

    use super::*;
    use crate::pinning::{
        certificate_signature,
        tests::{AcceptAll, PINNED_HOST, TestCa},
    };

    /// Serves `200 ok` over TLS 1.3 on a local port, one request per connection.
    fn serve_tls(leaf: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> u16 {
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![leaf], key)
        .unwrap();
        let config = Arc::new(config);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let Ok(conn) = rustls::ServerConnection::new(config.clone()) else {
                    continue;
                };
                let mut tls = rustls::StreamOwned::new(conn, stream);
                let mut request = Vec::new();
                let mut buf = [0; 1024];
                let complete = |r: &[u8]| r.windows(4).any(|w| w == b"\r\n\r\n");
                // A handshake the client rejects ends in a read error.
                while !complete(&request) {
                    match tls.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                if complete(&request) {
                    let _ = tls.write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    );
                    tls.conn.send_close_notify();
                    let _ = tls.flush();
                }
            }
        });

        port
    }

    fn local_url(port: u16) -> Url {
        Url::parse(&format!("https://localhost:{port}/exposurekeyset.tar.gz")).unwrap()
    }

    fn verifier_for(ca: &TestCa, pins: PinnedSignatures) -> PinningVerifier {
        let webpki = ca.webpki();
        let validator =
            CertificateValidator::new(pins, Arc::new(WebPkiBaseline::new(webpki.clone())));
        PinningVerifier::new(validator, webpki)
    }

    fn verify(
        verifier: &PinningVerifier,
        host: &'static str,
        leaf: &CertificateDer<'_>,
    ) -> Result<ServerCertVerified, rustls::Error> {
        verifier.verify_server_cert(
            leaf,
            &[],
            &ServerName::try_from(host).unwrap(),
            &[],
            UnixTime::now(),
        )
    }

    #[test]
    fn test_pinned_host_accepts_matching_leaf() {
        let ca = TestCa::new();
        let leaf = ca.issue(PINNED_HOST);
        let mut pins = PinnedSignatures::new();
        pins.insert(PINNED_HOST, certificate_signature(&leaf).unwrap())
            .unwrap();

        assert!(verify(&verifier_for(&ca, pins), PINNED_HOST, &leaf).is_ok());
    }

    #[test]
    fn test_pinned_host_rejects_other_leaf() {
        let ca = TestCa::new();
        let pinned_leaf = ca.issue(PINNED_HOST);
        let presented_leaf = ca.issue(PINNED_HOST);
        let mut pins = PinnedSignatures::new();
        pins.insert(PINNED_HOST, certificate_signature(&pinned_leaf).unwrap())
            .unwrap();

        let err = verify(&verifier_for(&ca, pins), PINNED_HOST, &presented_leaf)
            .unwrap_err();
        assert!(is_pinning_rejection(&err));
    }

    #[test]
    fn test_unpinned_host_uses_webpki() {
        let ca = TestCa::new();
        let verifier = verifier_for(&ca, PinnedSignatures::new());

        let leaf = ca.issue("unpinned.example.org");
        assert!(verify(&verifier, "unpinned.example.org", &leaf).is_ok());

        // webpki still rejects a name mismatch, and that is not a pinning failure.
        let err = verify(&verifier, "other.example.org", &leaf).unwrap_err();
        assert!(!is_pinning_rejection(&err));
    }

    #[test]
    fn test_decision_is_per_host() {
        let ca = TestCa::new();
        let pinned_leaf = ca.issue(PINNED_HOST);
        let mut pins = PinnedSignatures::new();
        pins.insert(PINNED_HOST, certificate_signature(&pinned_leaf).unwrap())
            .unwrap();
        let validator = CertificateValidator::new(pins, Arc::new(AcceptAll));
        let verifier = PinningVerifier::new(validator, ca.webpki());

        assert!(verify(&verifier, PINNED_HOST, &pinned_leaf).is_ok());
        // A successful pinned handshake must not leak into other hosts.
        let other_leaf = ca.issue("unpinned.example.org");
        assert!(verify(&verifier, "unpinned.example.org", &other_leaf).is_ok());
        assert!(verify(&verifier, PINNED_HOST, &other_leaf).is_err());
    }

    #[test]
    fn test_rejection_is_found_behind_io_errors() {
        let tls = rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        );
        let wrapped = io::Error::new(io::ErrorKind::InvalidData, tls);
        assert!(is_pinning_rejection(&wrapped));

        let other = io::Error::new(io::ErrorKind::InvalidData, "nope");
        assert!(!is_pinning_rejection(&other));
    }

    #[test]
    fn test_pinning_failures_are_not_retriable() {
        let err = TransportError::CertificatePinningFailed {
            host: PINNED_HOST.to_owned(),
        };
        assert!(!err.is_retriable());
    }

    #[test(tokio::test)]
    async fn test_handshake_with_matching_pin_succeeds() {
        let ca = TestCa::new();
        let (leaf, key) = ca.issue_with_key("localhost");
        let mut pins = PinnedSignatures::new();
        pins.insert("localhost", certificate_signature(&leaf).unwrap())
            .unwrap();
        let port = serve_tls(leaf, key);
        let transport = PinnedTransport::builder(pins, ca.roots())
            .with_timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        let response = transport.get(local_url(port), None).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"ok");
    }

    #[test(tokio::test)]
    async fn test_handshake_with_mismatched_pin_fails_pinning() {
        let ca = TestCa::new();
        let (leaf, key) = ca.issue_with_key("localhost");
        let other_leaf = ca.issue("localhost");
        let mut pins = PinnedSignatures::new();
        pins.insert("localhost", certificate_signature(&other_leaf).unwrap())
            .unwrap();
        let port = serve_tls(leaf, key);
        let transport = PinnedTransport::builder(pins, ca.roots())
            .with_timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        let err = transport.get(local_url(port), None).await.unwrap_err();

        match &err {
            TransportError::CertificatePinningFailed { host } => {
                assert_eq!(host, "localhost")
            }
            other => panic!("expected a pinning failure, got {other:?}"),
        }
        assert!(!err.is_retriable());
    }

    #[test(tokio::test)]
    async fn test_transport_builds_and_refuses_plain_http() {
        let transport = PinnedTransport::builder(
            PinnedSignatures::new(),
            crate::roots::webpki_root_store(),
        )
        .with_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

        let err = transport
            .get(Url::parse("http://localhost:1/export.tar.gz").unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(..)), "{err:?}");
    }
}
