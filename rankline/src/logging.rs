//! Diagnostics for the launcher and participants.
//!
//! Tracing goes to stderr only. Stdout carries the ordered transcript and
//! nothing else, so log lines can never interleave with rank lines.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` if unset. Participants inherit the
/// variable from the launcher, so
///
/// ```bash
/// RUST_LOG=rankline=debug rankline launch -n 4
/// ```
///
/// traces the hub and every rank into the same stderr.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
