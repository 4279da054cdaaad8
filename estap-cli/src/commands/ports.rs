//! `estap open-ports`

use anyhow::Result;
use clap::Args;
use std::path::Path;

use crate::config::DeployConfig;
use crate::pipeline::Progress;
use crate::preflight::{self, Requirements};
use crate::security_groups::{self, IngressRequest, RuleOutcome};

#[derive(Debug, Args, Clone)]
pub struct OpenPortsArgs {
    /// Security group id; repeat for several groups
    #[arg(long = "group", required = true)]
    pub groups: Vec<String>,

    /// Port to open; repeat for several ports
    #[arg(long = "port", default_values_t = [estap_core::ESTAP_PORT, 5432])]
    pub ports: Vec<u16>,

    #[arg(long, default_value = "0.0.0.0/0")]
    pub cidr: String,

    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,
}

pub async fn handle(config_path: &Path, args: OpenPortsArgs) -> Result<()> {
    let config = DeployConfig::load(config_path)?;
    let checks = preflight::check(
        &Requirements {
            tools: vec!["aws"],
            ..Requirements::default()
        },
        &config.tools,
    );
    checks.ensure()?;

    let request = IngressRequest {
        groups: args.groups,
        ports: args.ports,
        cidr: args.cidr,
        region: args.region,
    };
    let results = security_groups::open_ports("aws", &request, &Progress::plain()).await?;

    let added = results
        .iter()
        .filter(|r| r.outcome == RuleOutcome::Added)
        .count();
    println!();
    println!(
        "✅ {added} rule(s) added, {} already present",
        results.len() - added
    );
    Ok(())
}
