//! Logs a fake fetch round the way the agent does. Run with
//! `RUST_LOG=debug cargo run -p en-telemetry --example fetch_round`.
use tracing::{debug, info, info_span, warn};

fn main() {
    let telemetry = en_telemetry::TelemetryConfig::new()
        .with_journald("en-telemetry-example")
        .init();

    let url = "https://cdn.example.org/v1/exposurekeyset.tar.gz";
    let span = info_span!("fetch", url);
    span.in_scope(|| {
        debug!(etag = "\"v1\"", "sending conditional request");
        info!(status = 304, "not modified, using cached bundle");
        warn!(expired = 2, notified = false, "cannot notify user, not authorized");
    });

    telemetry.flush_blocking();
}
