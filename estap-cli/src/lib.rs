//! estap CLI library
//!
//! Provisioning pipeline, pgbench driver and the supporting platform,
//! preflight and reporting layers behind the `estap` binary.

pub mod bench;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod pipeline;
pub mod preflight;
pub mod report;
pub mod security_groups;

pub use commands::{Cli, Commands};
