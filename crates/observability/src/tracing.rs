//! Tracing/logging initialization.
//!
//! The executor logs acquisition cycles and job outcomes with structured
//! fields (`job_id`, `acquisition`, `engine`); initialize once per process
//! and filter via `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Honors `RUST_LOG`; defaults to `info` for everything and `debug` for the
/// flowforge crates. Safe to call multiple times (subsequent calls are
/// no-ops).
pub fn init() {
    init_with_filter("info,flowforge=debug");
}

/// Initialize with an explicit default filter (still overridable via
/// `RUST_LOG`).
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    // JSON logs + timestamps so worker-thread interleavings stay readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(false)
        .try_init();
}
