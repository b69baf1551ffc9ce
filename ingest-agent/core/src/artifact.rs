//! The values that flow through the response handler chain.

use std::collections::BTreeMap;

use bytes::Bytes;
use ed25519_dalek::VerifyingKey;

/// Name of the archive member holding the signed payload.
pub const EXPORT_BIN: &str = "export.bin";
/// Name of the archive member holding the detached signature over [`EXPORT_BIN`].
pub const EXPORT_SIG: &str = "export.sig";
/// Length of the fixed, space padded header at the start of every export payload.
pub const EXPORT_HEADER_LEN: usize = 16;
/// The only export header version that is accepted.
pub const EXPORT_HEADER: &str = "EK Export v1";

/// The value threaded through the handler chain.
///
/// Only [`Artifact::Verified`] may ever be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Raw response bytes, possibly compressed.
    Bytes(Bytes),
    /// Members of an unpacked archive.
    Unpacked(ArchiveContents),
    /// A payload whose signature was checked against a trusted key.
    Verified(VerifiedExport),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Bytes(_) => "bytes",
            Artifact::Unpacked(_) => "unpacked",
            Artifact::Verified(_) => "verified",
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Artifact::Verified(_))
    }
}

/// Regular-file members of an archive, keyed by their path inside the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveContents(BTreeMap<String, Bytes>);

impl ArchiveContents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<Bytes>) {
        self.0.insert(name.into(), contents.into());
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Sum of the sizes of all members.
    pub fn total_size(&self) -> usize {
        self.0.values().map(Bytes::len).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, B: Into<Bytes>> FromIterator<(N, B)> for ArchiveContents {
    fn from_iter<I: IntoIterator<Item = (N, B)>>(iter: I) -> Self {
        let mut contents = Self::new();
        for (name, bytes) in iter {
            contents.insert(name, bytes);
        }
        contents
    }
}

/// An export payload whose detached signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedExport {
    /// The header with its padding removed, e.g. `EK Export v1`.
    pub header: String,
    /// Everything following the header.
    pub body: Bytes,
    /// The trusted key that produced the signature.
    pub signing_key: VerifyingKey,
}

impl VerifiedExport {
    /// The payload as it was signed: padded header followed by the body.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(EXPORT_HEADER_LEN + self.body.len());
        payload.extend_from_slice(self.header.as_bytes());
        payload.resize(EXPORT_HEADER_LEN, b' ');
        payload.extend_from_slice(&self.body);
        payload
    }
}

/// Splits a payload into its trimmed header and its body. Returns `None` if the
/// payload is shorter than a header or the header is not valid UTF-8.
pub fn split_header(payload: &Bytes) -> Option<(String, Bytes)> {
    if payload.len() < EXPORT_HEADER_LEN {
        return None;
    }
    let header = std::str::from_utf8(&payload[..EXPORT_HEADER_LEN]).ok()?;
    Some((header.trim_end().to_owned(), payload.slice(EXPORT_HEADER_LEN..)))
}
