//! Development-time tracing for the recovery pipeline.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted.
//!
//! - **Checkpoint audit log (`io/run_layout`)**: Product artifact at
//!   `<runs_dir>/<run_id>/checkpoint_audit.log`. Always written, unaffected by
//!   `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output: stderr, compact format.
/// Safe to call more than once; later calls are no-ops.
///
/// # Example
/// ```bash
/// RUST_LOG=autopack_recovery=debug autopack-recovery investigate --failure f.json --phase p.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
