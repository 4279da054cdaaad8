//! `estap endpoint`

use anyhow::{Result, bail};
use clap::Args;
use std::path::Path;

use crate::cluster::OcCluster;
use crate::config::{BankConfig, DeployConfig};
use crate::pipeline::{self, Progress};
use crate::preflight::{self, Requirements};

#[derive(Debug, Args, Clone)]
pub struct EndpointArgs {
    /// Namespace of the bank
    pub namespace: String,

    /// Helm release; defaults to the configured bank's release
    #[arg(long)]
    pub release: Option<String>,

    /// Configure the viewer once the address is known
    #[arg(long)]
    pub apply: bool,
}

/// The configured bank living in `namespace`, or a default one
fn bank_for(config: &DeployConfig, namespace: &str) -> BankConfig {
    config
        .banks
        .iter()
        .find(|bank| bank.namespace == namespace)
        .cloned()
        .unwrap_or_else(|| BankConfig::named(namespace, namespace))
}

pub async fn handle(config_path: &Path, args: EndpointArgs) -> Result<()> {
    let config = DeployConfig::load(config_path)?;
    let bank = bank_for(&config, &args.namespace);
    let release = args
        .release
        .clone()
        .unwrap_or_else(|| bank.release_name().to_string());

    let checks = preflight::check(
        &Requirements {
            tools: vec!["oc"],
            session: Some("oc"),
            paths: vec![],
        },
        &config.tools,
    );
    checks.ensure()?;

    let progress = Progress::plain();
    let endpoint = pipeline::recheck_endpoint(
        &OcCluster::default(),
        &bank,
        &release,
        &config.polling,
        args.apply,
        &progress,
    )
    .await?;

    if !endpoint.is_resolved() {
        bail!("{} has no external address yet", endpoint.service);
    }
    println!();
    println!("✅ {}:{}", endpoint.host, endpoint.port);
    Ok(())
}
