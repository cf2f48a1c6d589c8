//! `tracing` subscriber setup for binaries built with the `tracing` feature.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// With `json = true` events are emitted as flattened JSON lines, which is
/// what the CLI uses for machine-readable runs. Span close events carry the
/// timing of the instrumented detector and solver entry points.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
