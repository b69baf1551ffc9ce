//! Handles loading and validating the keys that exports are signed with.

use std::{array::TryFromSliceError, fs, io, path::Path};

use ed25519_dalek::{SignatureError, VerifyingKey};
use jose_jwk::{Jwk, JwkSet};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// The set of Ed25519 keys an export may be signed with.
///
/// Keys are deduplicated, so the same key listed twice is only tried once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedKeys(Vec<VerifyingKey>);

impl TrustedKeys {
    pub fn new(keys: impl IntoIterator<Item = VerifyingKey>) -> Self {
        let mut trusted = Self::default();
        for key in keys {
            trusted.insert(key);
        }
        trusted
    }

    pub fn insert(&mut self, key: VerifyingKey) {
        if !self.0.contains(&key) {
            self.0.push(key);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerifyingKey> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads the keys from a JWK (Set) file on disk.
    pub fn load(
        path: &Path,
        expected_sha256_checksum: Option<&[u8; 32]>,
    ) -> Result<Self, KeyLoadError> {
        let contents = fs::read(path).map_err(|source| KeyLoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let keys = Self::from_jwks(&contents, expected_sha256_checksum)?;
        info!(path = %path.display(), count = keys.len(), "loaded trusted keys");

        Ok(keys)
    }

    /// Deserializes `contents` into a set of public keys, after verifying it against a
    /// checksum if one is given.
    ///
    /// `contents` is either a JWK Set (`{"keys": [...]}`) or a single JWK.
    pub fn from_jwks(
        contents: &[u8],
        expected_sha256_checksum: Option<&[u8; 32]>,
    ) -> Result<Self, KeyLoadError> {
        if let Some(expected) = expected_sha256_checksum {
            let key_checksum = <Sha256 as Digest>::digest(contents);
            if key_checksum.as_slice() != expected {
                return Err(KeyLoadError::MismatchedChecksum);
            }
        }

        let jwks = match serde_json::from_slice::<JwkSet>(contents) {
            Ok(set) => set.keys,
            Err(set_err) => match serde_json::from_slice::<Jwk>(contents) {
                Ok(jwk) => vec![jwk],
                Err(_) => return Err(KeyLoadError::InvalidEncoding(set_err)),
            },
        };

        let mut keys = Self::default();
        for jwk in jwks {
            keys.insert(jwk_to_dalek(jwk)?);
        }
        if keys.is_empty() {
            warn!("key file contained no keys");
            return Err(KeyLoadError::Empty);
        }

        Ok(keys)
    }
}

impl<'a> IntoIterator for &'a TrustedKeys {
    type Item = &'a VerifyingKey;
    type IntoIter = std::slice::Iter<'a, VerifyingKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    #[error("failed reading key file `{path}`")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("key file did not match the expected checksum")]
    MismatchedChecksum,
    #[error("not a json web key (set): {0}")]
    InvalidEncoding(#[source] serde_json::Error),
    #[error("key file contained no keys")]
    Empty,
    #[error(transparent)]
    InvalidKey(#[from] JwkToDalekError),
}

#[derive(Debug, thiserror::Error)]
pub enum JwkToDalekError {
    #[error("the key uses a signing algo that we don't support")]
    UnsupportedKeyAlgo(Box<Jwk>),
    #[error("the key was supposed to be a public key, but encountered a private key instead")]
    UnexpectedPrivateKey(Box<Jwk>),
    #[error("invalid number of bytes in `.x` field of JWK")]
    InvalidBytes(#[from] TryFromSliceError),
    #[error("ed25519 public key failed validation: {0}")]
    InvalidPubKey(#[from] SignatureError),
}

/// Converts a [`Jwk`] to a [`ed25519_dalek::VerifyingKey`].
pub fn jwk_to_dalek(jwk: Jwk) -> Result<VerifyingKey, JwkToDalekError> {
    let jose_jwk::Key::Okp(ref okp) = jwk.key else {
        return Err(JwkToDalekError::UnsupportedKeyAlgo(Box::new(jwk)));
    };
    if okp.crv != jose_jwk::OkpCurves::Ed25519 {
        return Err(JwkToDalekError::UnsupportedKeyAlgo(Box::new(jwk)));
    }
    // Check secret field. Should be none for pub keys.
    if okp.d.is_some() {
        return Err(JwkToDalekError::UnexpectedPrivateKey(Box::new(jwk)));
    }
    let pubkey = VerifyingKey::from_bytes(okp.x.as_ref().try_into()?)?;

    Ok(pubkey)
}

#[cfg(test)]
mod test {
    use base64::Engine as _;

    use super::*;

    // See https://datatracker.ietf.org/doc/html/rfc8037#appendix-A.2
    const RFC_PUBKEY_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";
    const RFC_PUBKEY: [u8; 32] = hex_literal::hex!(
        "d7 5a 98 01 82 b1 0a b7 d5 4b fe d3 c9 64 07 3a
        0e e1 72 f3 da a6 23 25 af 02 1a 68 f7 07 51 1a"
    );

    fn okp_jwk(x: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(x),
        })
    }

    #[test]
    fn pub_jwk_test_vectors() {
        // arrange
        let rfc_example = serde_json::json! ({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": RFC_PUBKEY_X,
        });
        let jwk: Jwk = serde_json::from_value(rfc_example).unwrap();

        // act
        let verifying_key = jwk_to_dalek(jwk).expect("failed to convert to dalek key");

        // assert
        assert_eq!(verifying_key.as_bytes(), &RFC_PUBKEY);
    }

    #[test]
    fn loads_jwk_sets_and_single_keys() {
        let other = ed25519_dalek::SigningKey::from_bytes(&[7; 32]).verifying_key();
        let set = serde_json::json!({
            "keys": [okp_jwk(&RFC_PUBKEY), okp_jwk(other.as_bytes()), okp_jwk(&RFC_PUBKEY)],
        });
        let keys = TrustedKeys::from_jwks(set.to_string().as_bytes(), None).unwrap();
        assert_eq!(keys.len(), 2, "duplicate keys should be dropped");

        let single = okp_jwk(&RFC_PUBKEY).to_string();
        let keys = TrustedKeys::from_jwks(single.as_bytes(), None).unwrap();
        assert_eq!(keys.iter().next().unwrap().as_bytes(), &RFC_PUBKEY);
    }

    #[test]
    fn checksum_is_verified_before_parsing() {
        let contents = okp_jwk(&RFC_PUBKEY).to_string();
        let checksum: [u8; 32] = Sha256::digest(contents.as_bytes()).into();

        assert!(TrustedKeys::from_jwks(contents.as_bytes(), Some(&checksum)).is_ok());
        assert!(matches!(
            TrustedKeys::from_jwks(contents.as_bytes(), Some(&[0; 32])),
            Err(KeyLoadError::MismatchedChecksum)
        ));
    }

    #[test]
    fn rejects_private_and_foreign_keys() {
        let mut private = okp_jwk(&RFC_PUBKEY);
        private["d"] = serde_json::json!("nWGxne_9WmC6hEr0kuwsxERJxWl7MmkZcDusAxyuf2A");
        assert!(matches!(
            TrustedKeys::from_jwks(private.to_string().as_bytes(), None),
            Err(KeyLoadError::InvalidKey(JwkToDalekError::UnexpectedPrivateKey(_)))
        ));

        let x25519 = serde_json::json!({
            "kty": "OKP",
            "crv": "X25519",
            "x": RFC_PUBKEY_X,
        });
        assert!(matches!(
            TrustedKeys::from_jwks(x25519.to_string().as_bytes(), None),
            Err(KeyLoadError::InvalidKey(JwkToDalekError::UnsupportedKeyAlgo(_)))
        ));
    }

    #[test]
    fn empty_set_is_an_error() {
        assert!(matches!(
            TrustedKeys::from_jwks(br#"{"keys": []}"#, None),
            Err(KeyLoadError::Empty)
        ));
        assert!(matches!(
            TrustedKeys::from_jwks(b"not json", None),
            Err(KeyLoadError::InvalidEncoding(_))
        ));
    }
}
