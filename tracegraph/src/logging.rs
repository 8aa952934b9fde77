//! Diagnostic tracing for pipeline and synthesis runs.
//!
//! Events go to stderr, filtered by `RUST_LOG`. Stage checkpoints
//! (`io::checkpoint`) are the persisted record of a run and are written
//! whatever the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or does not parse.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the stderr subscriber. Later calls leave the first one in place.
///
/// ```bash
/// RUST_LOG=tracegraph=debug tracegraph synthesize --patterns patterns.json
/// ```
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
