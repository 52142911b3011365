//! Development-time tracing for debugging the engine.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`; it is diagnostics
//! only. Run artifacts (memory snapshots, tool logs) are always written under
//! the run directory regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=restorer=debug restorer run --input photo.png --output runs/
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
