//! Log setup shared by the ingest agent binaries.
//!
//! ```no_run
//! let telemetry = en_telemetry::TelemetryConfig::new()
//!     .with_journald("en-ingest-agent")
//!     .init();
//! tracing::info!("started");
//! telemetry.flush_blocking();
//! ```

use std::io::{IsTerminal as _, Write as _};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer as _,
    filter::{Directive, ParseError}, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

/// Directives applied on top of the base level unless `RUST_LOG` says otherwise.
/// The TLS and HTTP stack is chatty at `info` during every handshake.
const QUIET_DEPENDENCIES: &[&str] = &["rustls=warn", "hyper_util=warn", "reqwest=warn"];

/// Where log records end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// The systemd journal, tagged with a syslog identifier.
    Journald { syslog_identifier: String },
}

#[derive(Debug)]
pub struct TelemetryConfig {
    target: LogTarget,
    filter: EnvFilter,
}

impl TelemetryConfig {
    /// Logs to stderr at INFO, or whatever `RUST_LOG` asks for.
    #[expect(clippy::new_without_default, reason = "may add required args later")]
    #[must_use]
    pub fn new() -> Self {
        Self {
            target: LogTarget::Stderr,
            filter: default_filter(),
        }
    }

    /// Logs to journald under `syslog_identifier` when running as a service.
    ///
    /// Attached to a terminal, records still go to stderr.
    #[must_use]
    pub fn with_journald(mut self, syslog_identifier: &str) -> Self {
        if !std::io::stderr().is_terminal() {
            self.target = LogTarget::Journald {
                syslog_identifier: syslog_identifier.to_owned(),
            };
        }
        self
    }

    #[must_use]
    pub fn with_global_filter(mut self, filter: EnvFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replaces the filter with `directives`, e.g. `"en_ingest_agent=debug"`.
    pub fn with_directives(mut self, directives: &str) -> Result<Self, ParseError> {
        self.filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse(directives)?;
        Ok(self)
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    pub fn try_init(self) -> Result<TelemetryFlusher, TelemetryError> {
        let stderr = || {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .boxed()
        };
        let output = match self.target {
            LogTarget::Stderr => stderr(),
            LogTarget::Journald { syslog_identifier } => match tracing_journald::layer() {
                Ok(layer) => layer.with_syslog_identifier(syslog_identifier).boxed(),
                Err(err) => {
                    eprintln!("journald is unavailable, logging to stderr: {err}");
                    stderr()
                }
            },
        };

        tracing_subscriber::registry()
            .with(output)
            .with(self.filter)
            .try_init()?;

        Ok(TelemetryFlusher { _priv: () })
    }

    /// Like [`Self::try_init`], for the start of `main`.
    ///
    /// # Panics
    /// If a global subscriber is already installed.
    pub fn init(self) -> TelemetryFlusher {
        self.try_init().expect("failed to initialize en-telemetry")
    }
}

fn default_filter() -> EnvFilter {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy();
    }
    QUIET_DEPENDENCIES.iter().fold(
        EnvFilter::new(LevelFilter::INFO.to_string()),
        |filter, directive| match directive.parse::<Directive>() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        },
    )
}

#[derive(Debug, thiserror::Error)]
#[error("failed to install the global tracing subscriber")]
pub struct TelemetryError(#[from] tracing_subscriber::util::TryInitError);

/// Returned by a successful init. Flush it before the process exits.
#[must_use = "call .flush_blocking() before exiting, otherwise buffered logs may be lost"]
pub struct TelemetryFlusher {
    _priv: (),
}

impl TelemetryFlusher {
    pub fn flush_blocking(self) {
        let _ = std::io::stderr().lock().flush();
        let _ = std::io::stdout().lock().flush();
    }
}
