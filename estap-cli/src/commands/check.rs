//! `estap check`

use anyhow::Result;
use std::path::Path;

use super::deploy::required_paths;
use crate::config::DeployConfig;
use crate::preflight::{self, Requirements};

pub fn handle(config_path: &Path) -> Result<()> {
    let config = DeployConfig::load(config_path)?;
    let tools: Vec<&str> = config.tools.keys().map(String::as_str).collect();

    println!("📋 Checking prerequisites...");
    let report = preflight::check(
        &Requirements {
            tools,
            session: Some("oc"),
            paths: required_paths(&config.banks),
        },
        &config.tools,
    );
    report.print();

    println!();
    report.ensure()?;
    println!("✅ All prerequisites met!");
    Ok(())
}
