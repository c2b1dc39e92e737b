//! Diagnostic tracing for dx-runner.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//!   For the detached Monitor, stderr is the job's `monitor.log` artifact.
//!
//! - **Product output**: the text/JSON printed by commands on stdout and the
//!   audit trail in `events.ndjson`. Neither is affected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_directive` when unset
/// (`warn` for CLI commands, `info` for the Monitor).
///
/// # Example
/// ```bash
/// RUST_LOG=dx_runner=debug dx-runner start --beads bd-1 --provider opencode ...
/// ```
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .compact(),
        )
        .try_init();
}
