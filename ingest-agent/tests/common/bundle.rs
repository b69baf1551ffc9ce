#![allow(dead_code)]
use std::io::Write as _;

use ed25519_dalek::{Signer as _, SigningKey};
use en_ingest_agent_core::artifact::{EXPORT_BIN, EXPORT_SIG};

pub const PAYLOAD: &[u8] = b"EK Export v1    \x08\x01\x10\x02\x1a\x02NL";

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&rand::random::<[u8; 32]>())
}

pub fn tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

/// A gzipped tarball of `payload` and its signature by `key`.
pub fn signed(key: &SigningKey, payload: &[u8]) -> Vec<u8> {
    let signature = key.sign(payload).to_bytes();
    tar_gz(&[(EXPORT_BIN, payload), (EXPORT_SIG, &signature)])
}
