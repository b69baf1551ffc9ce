//! `en-ingest-agent` keeps the local copy of the exposure key exports current, and
//! expires lab confirmation uploads that were never completed.
//!
//! A daemon round:
//!
//! 1. fetch every configured export over a certificate pinned connection, sending
//!    the entity tag of the cached bundle if there is one;
//! 2. run the response through the handler chain: cached bundle on `304`, archive
//!    extraction, signature verification;
//! 3. write the verified export and cache the raw bundle;
//! 4. remove expired pending upload requests, notifying the user if there were any.
use std::{borrow::Cow, path::Path, sync::Arc};

use chrono::{TimeDelta, Utc};
use clap::Parser as _;
use en_ingest_agent::{
    Args, Command, Settings,
    cache::DiskCache,
    fetch::{ExportFetcher, ExportPipeline},
    notifications::{SystemClock, TracingNotificationCenter},
    operations::{ExpiredLabConfirmationNotification, ExpiryReport, OperationError},
    storage::StorageController,
};
use en_ingest_agent_core::{PendingUploadRequest, TrustedKeys};
use en_security_utils::{reqwest::PinnedTransport, roots};
use eyre::{WrapErr as _, eyre};
use tokio::{
    signal::unix::{self, SignalKind},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

mod ingest_agent_result;
use ingest_agent_result::IngestAgentResult;

const CFG_DEFAULT_PATH: &str = "/etc/en_ingest_agent.toml";
const ENV_VAR_PREFIX: &str = "EN_INGEST_AGENT_";
const CFG_ENV_VAR: &str = const_format::concatcp!(ENV_VAR_PREFIX, "CONFIG");
const SYSLOG_IDENTIFIER: &str = "en-ingest-agent";

#[tokio::main]
async fn main() -> IngestAgentResult {
    let telemetry = en_telemetry::TelemetryConfig::new()
        .with_journald(SYSLOG_IDENTIFIER)
        .init();
    if let Err(err) = color_eyre::install() {
        warn!("failed installing color-eyre hooks: {err:?}");
    }

    let args = Args::parse();

    match run(&args).await {
        Ok(()) => {
            telemetry.flush_blocking();
            IngestAgentResult::Success
        }
        Err(err) => {
            error!("{err:?}");
            telemetry.flush_blocking();
            err.into()
        }
    }
}

fn get_config_source(args: &Args) -> Cow<'_, Path> {
    if let Some(config) = &args.config {
        info!("using config provided by command line argument: `{config}`");
        Cow::Borrowed(config.as_ref())
    } else if let Some(config) = figment::providers::Env::var(CFG_ENV_VAR) {
        info!("using config set in environment variable `{CFG_ENV_VAR}={config}`");
        Cow::Owned(std::path::PathBuf::from(config))
    } else {
        info!("using default config at `{CFG_DEFAULT_PATH}`");
        Cow::Borrowed(CFG_DEFAULT_PATH.as_ref())
    }
}

async fn run(args: &Args) -> eyre::Result<()> {
    let config_path = get_config_source(args);
    let settings = Settings::get(args, config_path, ENV_VAR_PREFIX)
        .wrap_err("failed reading settings")?;

    let settings_ser = match serde_json::to_string(&settings) {
        Ok(ser) => ser,
        Err(e) => {
            warn!("failed serializing settings as json, printing debug string: {e:?}");
            format!("{settings:?}")
        }
    };
    debug!("running with the following settings: {settings_ser}");

    let storage = StorageController::new(&settings.storage)?;

    match &args.command {
        Command::Fetch { url } => {
            let fetcher = build_fetcher(&settings)?;
            let stored = fetcher.fetch(url.clone()).await?;
            info!(path = %stored.path.display(), from_cache = stored.from_cache, "fetch done");
        }
        Command::ExpirePending => {
            let report = expire_pending(&settings, storage).await?;
            info!(expired = report.expired.len(), notified = report.notified, "expiry done");
        }
        Command::ScheduleUpload {
            identifier,
            valid_for,
        } => {
            let valid_for = i64::try_from(*valid_for)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .ok_or_else(|| eyre!("`--valid-for {valid_for}` is out of range"))?;
            let scheduled = storage
                .schedule_pending_upload(PendingUploadRequest::valid_for(
                    identifier.as_str(),
                    Utc::now(),
                    valid_for,
                ))
                .await?;
            if !scheduled {
                warn!(%identifier, "upload already pending, expiry date left unchanged");
            }
        }
        Command::CompleteUpload { identifier } => {
            if !storage.complete_pending_upload(identifier).await? {
                warn!(%identifier, "no pending upload with this identifier");
            }
        }
        Command::Daemon => daemon(&settings, storage).await?,
    }

    Ok(())
}

fn build_fetcher(settings: &Settings) -> eyre::Result<ExportFetcher> {
    let pins = settings.pins().wrap_err("invalid pinned signatures")?;
    if pins.is_empty() {
        warn!("no pinned signatures configured, relying on default validation only");
    }
    let roots_checksum = settings
        .root_certificates_checksum()
        .wrap_err("invalid `root_certificates_sha256`")?;
    let roots =
        roots::load_root_store(settings.root_certificates.as_deref(), roots_checksum.as_ref())
            .wrap_err("failed loading root certificates")?;

    let keys_checksum = settings
        .trusted_keys_checksum()
        .wrap_err("invalid `trusted_keys_sha256`")?;
    let keys = TrustedKeys::load(&settings.trusted_keys, keys_checksum.as_ref())
        .wrap_err("failed loading trusted keys")?;

    let transport = PinnedTransport::builder(pins, roots)
        .with_timeout(settings.request_timeout)
        .build()?;
    let cache = DiskCache::new(&settings.cache).wrap_err_with(|| {
        format!("failed creating cache directory `{}`", settings.cache.display())
    })?;
    let pipeline = ExportPipeline::new(
        cache,
        &settings.exports,
        settings.prefer_cache,
        settings.max_unpacked_size,
        Arc::new(keys),
    )?;

    Ok(ExportFetcher::new(transport, pipeline))
}

async fn expire_pending(
    settings: &Settings,
    storage: StorageController,
) -> Result<ExpiryReport, OperationError> {
    ExpiredLabConfirmationNotification::new(
        storage,
        Arc::new(TracingNotificationCenter::new(settings.notifications_authorized)),
        Arc::new(SystemClock),
        settings.upload_failed_message.as_str(),
    )
    .execute()
    .await
}

async fn daemon(settings: &Settings, storage: StorageController) -> eyre::Result<()> {
    let fetcher = build_fetcher(settings)?;
    if settings.export_urls.is_empty() {
        warn!("no export urls configured, only expiring pending uploads");
    }

    let mut interval = time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut sigint = unix::signal(SignalKind::interrupt())?;

    loop {
        // A signal drops the round in flight, a partial fetch never reaches disk.
        tokio::select! {
            _ = sigterm.recv() => { warn!("received SIGTERM"); break }
            _ = sigint.recv() => { warn!("received SIGINT"); break }
            () = async {
                interval.tick().await;
                daemon_round(settings, &fetcher, &storage).await;
            } => {}
        }
    }
    info!("exiting gracefully");

    Ok(())
}

async fn daemon_round(
    settings: &Settings,
    fetcher: &ExportFetcher,
    storage: &StorageController,
) {
    for url in &settings.export_urls {
        match fetcher.fetch(url.clone()).await {
            Ok(stored) => {
                info!(%url, path = %stored.path.display(), from_cache = stored.from_cache, "export up to date")
            }
            Err(err) => error!(%url, "failed fetching export: {:?}", eyre::Report::new(err)),
        }
    }

    match expire_pending(settings, storage.clone()).await {
        Ok(report) if !report.expired.is_empty() => {
            info!(expired = ?report.expired, notified = report.notified, "expired pending uploads")
        }
        Ok(_) => debug!("no expired pending uploads"),
        Err(err) => error!("{:?}", eyre::Report::new(err)),
    }
}
