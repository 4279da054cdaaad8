//! `estap deploy`

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cluster::{Cluster, OcCluster};
use crate::config::{BankConfig, DeployConfig};
use crate::pipeline;
use crate::preflight::{self, Requirements};
use crate::report::DeployReport;

#[derive(Debug, Args, Clone)]
pub struct DeployArgs {
    /// Provision a single bank in this namespace instead of the configured banks
    pub namespace: Option<String>,

    /// Viewer source directory for the single bank
    #[arg(requires = "namespace")]
    pub source_dir: Option<PathBuf>,

    /// Provision banks concurrently, one task per bank
    #[arg(long)]
    pub parallel: bool,

    /// Also write the run summary as TOML to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// A chart reference that names a directory on this machine
fn local_chart(chart: &str) -> Option<PathBuf> {
    (chart.starts_with('.') || chart.starts_with('/') || chart.starts_with('~'))
        .then(|| crate::config::expand_path(Path::new(chart)))
}

/// Files every bank reads before it touches the cluster
pub fn required_paths(banks: &[BankConfig]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for bank in banks {
        let bank_paths = [
            Some(bank.database.manifest.clone()),
            Some(bank.viewer.source_dir.clone()),
            local_chart(&bank.release.chart),
        ];
        for path in bank_paths.into_iter().flatten() {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

pub async fn handle(config_path: &Path, args: DeployArgs) -> Result<()> {
    let mut config = DeployConfig::load(config_path)?;
    if let Some(namespace) = &args.namespace {
        config.single_bank(namespace, args.source_dir.clone());
    }
    if config.banks.is_empty() {
        bail!("no banks configured in {}", config_path.display());
    }

    println!("📋 Checking prerequisites...");
    let requirements = Requirements {
        tools: vec!["oc", "helm"],
        session: Some("oc"),
        paths: required_paths(&config.banks),
    };
    let checks = preflight::check(&requirements, &config.tools);
    checks.print();
    checks.ensure()?;

    let cluster: Arc<dyn Cluster> = Arc::new(OcCluster::default());
    let results = pipeline::run_banks(cluster, &config.banks, &config.polling, args.parallel).await;

    let report = DeployReport::new(Utc::now().to_rfc3339(), &results);
    report.print();
    if let Some(path) = &args.report {
        report.write(path)?;
        println!("📄 Report written to: {}", path.display());
    }

    let failures: Vec<String> = results
        .iter()
        .filter_map(|(name, result)| result.as_ref().err().map(|e| format!("{name}: {e}")))
        .collect();
    if !failures.is_empty() {
        bail!("{}", failures.join("; "));
    }
    Ok(())
}
