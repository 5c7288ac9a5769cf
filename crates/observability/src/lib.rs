//! `flowforge-observability` — tracing/logging initialization.

pub mod tracing;

pub use tracing::{init, init_with_filter};
