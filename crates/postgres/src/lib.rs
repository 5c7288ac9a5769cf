//! `flowforge-postgres` — Postgres-backed store for jobs, incidents, and
//! execution lookups.
//!
//! The store traits are synchronous (the executor runs on plain threads);
//! this adapter owns a small tokio runtime and blocks on sqlx internally.
//! The conditional lock is a single conditional `UPDATE`, which is exactly
//! the atomic cross-node primitive the executor relies on.

pub mod store;

pub use store::PostgresEngineStore;
