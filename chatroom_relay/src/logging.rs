// Diagnostic logging setup.
//
// Diagnostics go through `tracing` to stderr; stdout is reserved for the
// room transcript (join/leave announcements and chat echo) written by the
// `OutputSink`. `RUST_LOG` overrides the per-binary default level.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
