//! Security sensitive code for the ingest agent lives here, so that it can be
//! audited in one spot.
//!
//! - [`pinning`] decides whether a server's certificate chain is trusted for a host.
//! - [`roots`] loads the trust anchors used for standard X.509 validation.
//! - [`reqwest`] (feature `reqwest`) wires both into an HTTPS client that consults
//!   the pinning decision on every handshake.

#![forbid(unsafe_code)]

pub mod pinning;
#[cfg(feature = "reqwest")]
pub mod reqwest;
pub mod response;
pub mod roots;

pub use pinning::{
    AuthenticationMethod, BaselineTrust, CertificateValidator, PinnedSignatures,
    ServerChallenge, TrustDecision, WebPkiBaseline,
};
pub use response::NetworkResponse;
