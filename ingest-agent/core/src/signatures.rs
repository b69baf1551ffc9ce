//! Handles validating detached signatures.

use base64::Engine as _;
use ed25519_dalek::{SIGNATURE_LENGTH, Signature, VerifyingKey};
use tracing::{debug, error};

use crate::TrustedKeys;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed input: {0}")]
    Malformed(&'static str),
    #[error("signature did not validate against any trusted key")]
    Invalid,
}

/// Verifies that `signature` is a valid Ed25519 signature over `payload` by any of the
/// trusted keys, returning the key that validated it.
///
/// The signature is either the 64 raw signature bytes, or their base64 encoding.
pub fn verify(
    payload: &[u8],
    signature: &[u8],
    keys: &TrustedKeys,
) -> Result<VerifyingKey, SignatureError> {
    if payload.is_empty() {
        return Err(SignatureError::Malformed("payload is empty"));
    }
    let signature = decode_signature(signature)?;
    if keys.is_empty() {
        error!("no trusted keys configured, no signature can validate");
        return Err(SignatureError::Invalid);
    }

    for key in keys {
        match key.verify_strict(payload, &signature) {
            Ok(()) => {
                debug!(key = %hex::encode(key.as_bytes()), "signature valid");
                return Ok(*key);
            }
            Err(err) => debug!(key = %hex::encode(key.as_bytes()), ?err, "key rejected"),
        }
    }

    error!(?signature, "signature was invalid for all trusted keys");
    Err(SignatureError::Invalid)
}

fn decode_signature(raw: &[u8]) -> Result<Signature, SignatureError> {
    if let Ok(bytes) = <&[u8; SIGNATURE_LENGTH]>::try_from(raw) {
        return Ok(Signature::from_bytes(bytes));
    }
    let decoded = base64::prelude::BASE64_STANDARD
        .decode(raw.trim_ascii())
        .map_err(|_| SignatureError::Malformed("signature is neither raw nor base64"))?;
    let bytes = <[u8; SIGNATURE_LENGTH]>::try_from(decoded.as_slice())
        .map_err(|_| SignatureError::Malformed("signature has the wrong length"))?;

    Ok(Signature::from_bytes(&bytes))
}
