//! Core shared library for the estap demo tooling
//!
//! Holds the naming conventions every stage agrees on and the typed
//! `PG*` connection settings consumed by both the `estap` CLI and the
//! viewer web app.

pub mod conventions;
pub mod pg;

pub use conventions::*;
pub use pg::{DsnError, PgSettings};

/// Crate version, shared by every binary in the workspace
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
