//! Diagnostic tracing for pipeline runs.
//!
//! Session files and `TEST_RESULTS.md` are the durable record of a run;
//! tracing output goes to stderr only and is controlled by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a compact stderr subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_filter` when unset or invalid.
///
/// ```bash
/// RUST_LOG=pipeline=debug pipeline run --prd PRD.md
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
