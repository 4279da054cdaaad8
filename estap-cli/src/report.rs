//! Deploy run report
//!
//! A summary printed after every `estap deploy`, optionally written as TOML
//! with `--report`. It records what happened; nothing reads it back.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::config::expand_path;
use crate::pipeline::{BankOutcome, PipelineError};

#[derive(Debug, Serialize)]
pub struct DeployReport {
    pub timestamp: String,
    pub all_succeeded: bool,
    #[serde(rename = "bank")]
    pub banks: Vec<BankSummary>,
}

#[derive(Debug, Serialize)]
pub struct BankSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_route: Option<String>,
    pub viewer_configured: bool,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BankSummary {
    fn from_result(name: &str, result: &Result<BankOutcome, PipelineError>) -> Self {
        match result {
            Ok(outcome) => Self {
                name: name.to_string(),
                namespace: Some(outcome.namespace.clone()),
                succeeded: true,
                endpoint_service: Some(outcome.endpoint.service.clone()),
                endpoint: outcome
                    .endpoint
                    .is_resolved()
                    .then(|| format!("{}:{}", outcome.endpoint.host, outcome.endpoint.port)),
                viewer_route: outcome.viewer_route.clone(),
                viewer_configured: outcome.configured,
                warnings: outcome.warnings.clone(),
                error: None,
            },
            Err(e) => Self {
                name: name.to_string(),
                namespace: None,
                succeeded: false,
                endpoint_service: None,
                endpoint: None,
                viewer_route: None,
                viewer_configured: false,
                warnings: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

impl DeployReport {
    pub fn new(timestamp: String, results: &[(String, Result<BankOutcome, PipelineError>)]) -> Self {
        let banks: Vec<BankSummary> = results
            .iter()
            .map(|(name, result)| BankSummary::from_result(name, result))
            .collect();
        let all_succeeded = banks.iter().all(|b| b.succeeded);
        Self {
            timestamp,
            all_succeeded,
            banks,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize deploy report")
    }

    /// Write the TOML report, creating parent directories as needed
    pub fn write(&self, output_path: &Path) -> Result<()> {
        let final_path = expand_path(output_path);

        if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
        }

        fs::write(&final_path, self.to_toml()?)
            .with_context(|| format!("Failed to write report to {}", final_path.display()))?;
        Ok(())
    }

    pub fn print(&self) {
        println!();
        println!("📋 estap deploy summary");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("Generated: {}", self.timestamp);

        for bank in &self.banks {
            println!();
            if let Some(error) = &bank.error {
                println!("  ❌ {}: {error}", bank.name);
                continue;
            }

            let status = if bank.viewer_configured { "✅" } else { "⚠️" };
            println!(
                "  {status} {} ({})",
                bank.name,
                bank.namespace.as_deref().unwrap_or("?")
            );
            match &bank.endpoint {
                Some(endpoint) => println!("     proxy:  {endpoint}"),
                None => println!("     proxy:  address pending"),
            }
            if let Some(route) = &bank.viewer_route {
                println!("     viewer: http://{route}");
            }
            for warning in &bank.warnings {
                println!("     ⚠️  {warning}");
            }
        }

        println!();
        if self.all_succeeded {
            println!("✅ All banks provisioned");
        } else {
            println!("⚠️  Some banks failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EndpointHandle;

    fn results() -> Vec<(String, Result<BankOutcome, PipelineError>)> {
        vec![
            (
                "bank-a".to_string(),
                Ok(BankOutcome {
                    bank: "bank-a".to_string(),
                    namespace: "estap-bank-a".to_string(),
                    endpoint: EndpointHandle {
                        service: "bank-a-estap-lb".to_string(),
                        host: "lb.example.com".to_string(),
                        port: 8888,
                    },
                    viewer_route: Some("pg-viewer-estap-bank-a.apps.example.com".to_string()),
                    configured: true,
                    warnings: vec![],
                }),
            ),
            (
                "bank-b".to_string(),
                Err(PipelineError::MissingCredentials {
                    missing: vec!["POSTGRES_PASSWORD".to_string()],
                }),
            ),
        ]
    }

    #[test]
    fn test_report_toml() {
        let report = DeployReport::new("2026-01-01T00:00:00Z".to_string(), &results());
        assert!(!report.all_succeeded);

        let text = report.to_toml().unwrap();
        assert!(text.contains("[[bank]]"));
        assert!(text.contains("endpoint = \"lb.example.com:8888\""));
        assert!(text.contains("POSTGRES_PASSWORD"));
    }

    #[test]
    fn test_report_written_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs/last.toml");
        let report = DeployReport::new("2026-01-01T00:00:00Z".to_string(), &results());
        report.write(&path).unwrap();
        let parsed: toml::Table = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["all_succeeded"].as_bool(), Some(false));
    }
}
