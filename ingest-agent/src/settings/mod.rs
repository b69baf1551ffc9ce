use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

use en_security_utils::{PinnedSignatures, pinning::PinningConfigError};
use figment::providers::Format as _;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use url::Url;

mod args;
pub use args::{Args, Command};


/// `Settings` are the configurable options for running the ingest agent.
///
/// The only entry point to construct `Settings` is `Settings::get`.
#[serde_as]
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Directory of the key/value store holding pending upload requests.
    pub storage: PathBuf,
    /// Directory where raw export bundles are cached for conditional requests.
    pub cache: PathBuf,
    /// Directory where verified exports are written.
    pub exports: PathBuf,
    /// JWK (Set) with the keys exports may be signed with.
    pub trusted_keys: PathBuf,
    /// Hex encoded sha256 of the `trusted_keys` file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_keys_sha256: Option<String>,
    /// PEM bundle of root certificates. The built-in webpki roots if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_certificates: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_certificates_sha256: Option<String>,
    /// Host name to the hex encoded signature of its leaf certificate.
    #[serde(default)]
    pub pinned_signatures: BTreeMap<String, String>,
    /// Exports fetched on every daemon tick.
    #[serde(default)]
    pub export_urls: Vec<Url>,
    pub prefer_cache: bool,
    pub max_unpacked_size: u64,
    #[serde_as(as = "DurationMilliSeconds")]
    pub request_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds")]
    pub poll_interval: Duration,
    pub notifications_authorized: bool,
    pub upload_failed_message: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: "/var/lib/en-ingest-agent/storage".into(),
            cache: "/var/cache/en-ingest-agent".into(),
            exports: "/var/lib/en-ingest-agent/exports".into(),
            trusted_keys: "/etc/en-ingest-agent/trusted_keys.json".into(),
            trusted_keys_sha256: None,
            root_certificates: None,
            root_certificates_sha256: None,
            pinned_signatures: BTreeMap::new(),
            export_urls: Vec::new(),
            prefer_cache: false,
            max_unpacked_size: 64 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60 * 60),
            notifications_authorized: true,
            upload_failed_message: "Your GGD key has expired before your test result \
                could be shared. Contact the GGD to get a new key."
                .to_owned(),
        }
    }
}

impl Settings {
    /// Constructs `Settings` from a config file, environment variables, and command line
    /// arguments. Command line arguments always take precedence over environment variables, which
    /// in turn take precedence over the config file.
    pub fn get<P: AsRef<Path>>(
        args: &Args,
        config: P,
        env_prefix: &str,
    ) -> figment::error::Result<Settings> {
        figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(Settings::default()))
            .merge(figment::providers::Toml::file(config))
            .merge(figment::providers::Env::prefixed(env_prefix))
            .merge(figment::providers::Serialized::defaults(args))
            .extract()
    }

    pub fn pins(&self) -> Result<PinnedSignatures, PinningConfigError> {
        PinnedSignatures::from_hex(&self.pinned_signatures)
    }

    pub fn trusted_keys_checksum(&self) -> Result<Option<[u8; 32]>, hex::FromHexError> {
        self.trusted_keys_sha256.as_deref().map(parse_sha256).transpose()
    }

    pub fn root_certificates_checksum(
        &self,
    ) -> Result<Option<[u8; 32]>, hex::FromHexError> {
        self.root_certificates_sha256
            .as_deref()
            .map(parse_sha256)
            .transpose()
    }
}

fn parse_sha256(hex_str: &str) -> Result<[u8; 32], hex::FromHexError> {
    let mut out = [0; 32];
    hex::decode_to_slice(hex_str.trim(), &mut out)?;
    Ok(out)
}
