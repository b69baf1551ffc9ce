use clap::{Parser, Subcommand};
use serde::Serialize;

/// Fetches exposure key exports over certificate pinned connections, verifies their
/// signatures and stores them, and expires stale lab confirmation uploads.
///
/// Nothing is written to the exports directory unless its signature verified against
/// one of the trusted keys.
#[derive(Debug, Parser, Serialize)]
#[command(author, version)]
pub struct Args {
    /// The path to the config file.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Directory of the persistent key/value store.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Directory for cached export bundles.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    /// Directory that verified exports are written to.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<String>,
    /// JWK or JWK Set file with the trusted signing keys.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_keys: Option<String>,
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_keys_sha256: Option<String>,
    /// PEM bundle of root certificates used instead of the built-in roots.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_certificates: Option<String>,
    /// Use a cached bundle even if the server sent a fresh one.
    #[arg(long, global = true)]
    // Serialization is skipped if not set because command line args always take
    // precedence over env vars and a config file. This would otherwise make it
    // impossible to set this config option outside of cli args.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub prefer_cache: bool,
    /// Upper bound in bytes for the unpacked size of a bundle.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unpacked_size: Option<u64>,
    /// Timeout in milliseconds of a single request.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Milliseconds between two rounds of the daemon.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    /// Whether the user allowed notifications to be shown.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications_authorized: Option<bool>,
    #[command(subcommand)]
    #[serde(skip)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Fetches, verifies and stores a single export.
    Fetch {
        /// The https URL of the export bundle.
        url: url::Url,
    },
    /// Removes expired pending upload requests, notifying the user if there were any.
    ExpirePending,
    /// Records a pending lab confirmation upload.
    ScheduleUpload {
        identifier: String,
        /// Seconds until the request expires.
        #[arg(long)]
        valid_for: u64,
    },
    /// Removes a pending lab confirmation upload once it went through.
    CompleteUpload { identifier: String },
    /// Periodically fetches all configured exports and expires pending uploads.
    Daemon,
}
