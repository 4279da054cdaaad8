//! External tool checker
//!
//! Validates that the binaries a command shells out to are on `PATH` and
//! new enough, using the requirements from the `[tools]` config table.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::ToolSpec;

/// Result of the check for a single binary
#[derive(Debug)]
pub struct ToolCheck {
    pub name: String,
    pub found: bool,
    pub installed_version: Option<String>,
    pub required_version: String,
    pub meets_requirement: bool,
    pub path: Option<PathBuf>,
    pub install_hint: Option<String>,
}

impl ToolCheck {
    pub fn is_ok(&self) -> bool {
        self.found && self.meets_requirement
    }
}

/// Overall tool check result
#[derive(Debug)]
pub struct ToolReport {
    pub checks: Vec<ToolCheck>,
    pub all_met: bool,
}

impl ToolReport {
    /// Get list of missing or outdated binaries
    pub fn missing(&self) -> Vec<&ToolCheck> {
        self.checks.iter().filter(|c| !c.is_ok()).collect()
    }

    /// Print one line per tool
    pub fn print(&self) {
        for check in &self.checks {
            let status = if check.is_ok() {
                "✅"
            } else if check.found {
                "⚠️"
            } else {
                "❌"
            };

            print!("  {} {} ", status, check.name);

            match &check.installed_version {
                Some(installed) if check.meets_requirement => println!("(installed: {installed}, OK)"),
                Some(installed) => {
                    println!("(installed: {installed}, requires: {}) ⚠️", check.required_version);
                }
                None => {
                    print!("(not installed) - requires: {}", check.required_version);
                    match &check.install_hint {
                        Some(hint) => println!(" - {hint}"),
                        None => println!(),
                    }
                }
            }
        }
    }
}

/// Check if binary exists in PATH
fn find_binary(name: &str) -> Option<PathBuf> {
    duct::cmd("which", [name])
        .stdout_capture()
        .stderr_null()
        .unchecked()
        .run()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| PathBuf::from(s.trim()))
            } else {
                None
            }
        })
}

/// Get version of binary by running it with its version arguments
fn get_version(name: &str, args: &[String]) -> Option<String> {
    let output = duct::cmd(name, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    // Some tools print their version on stderr
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    extract_version(&text)
}

/// Extract a semantic version from version output, padding a missing patch
/// component. Handles formats like:
///   "Client Version: 4.14.0" -> "4.14.0"
///   "v3.14.2+gc309b6f" -> "3.14.2"
///   "pgbench (PostgreSQL) 16.2" -> "16.2.0"
///   "aws-cli/2.15.0 Python/3.11.6" -> "2.15.0"
fn extract_version(output: &str) -> Option<String> {
    let re = regex::Regex::new(r"v?(\d+)\.(\d+)(?:\.(\d+))?").ok()?;
    let cap = re.captures(output)?;
    let patch = cap.get(3).map_or("0", |m| m.as_str());
    Some(format!("{}.{}.{}", &cap[1], &cap[2], patch))
}

/// Check an installed version against a Cargo-style requirement such as
/// `>=4.10.0`, `^3.12` or `>=2.0, <3`
fn version_meets_requirement(installed: &str, requirement: &str) -> Result<bool> {
    let installed_ver = semver::Version::parse(installed.trim())
        .with_context(|| format!("Failed to parse installed version: {installed}"))?;
    let required = semver::VersionReq::parse(requirement.trim())
        .with_context(|| format!("Failed to parse version requirement: {requirement}"))?;
    Ok(required.matches(&installed_ver))
}

/// Check a single binary against its requirement
fn check_tool(name: &str, spec: &ToolSpec) -> ToolCheck {
    let path = find_binary(name);
    let found = path.is_some();

    let (installed_version, meets_requirement) = if found {
        if let Some(version) = get_version(name, &spec.version_args) {
            let meets = version_meets_requirement(&version, &spec.version).unwrap_or(false);
            (Some(version), meets)
        } else {
            // 🤓 Binary found but version unknown - assume OK
            (Some("unknown".to_string()), true)
        }
    } else {
        (None, false)
    };

    ToolCheck {
        name: name.to_string(),
        found,
        installed_version,
        required_version: spec.version.clone(),
        meets_requirement,
        path,
        install_hint: spec.install_hint.clone(),
    }
}

/// Check the named tools; names without a requirement are only looked up on PATH
pub fn check_tools(names: &[&str], specs: &BTreeMap<String, ToolSpec>) -> ToolReport {
    let any_version = ToolSpec {
        version: ">=0.0.0".to_string(),
        version_args: vec!["--version".to_string()],
        install_hint: None,
    };

    let checks: Vec<ToolCheck> = names
        .iter()
        .map(|name| check_tool(name, specs.get(*name).unwrap_or(&any_version)))
        .collect();

    let all_met = checks.iter().all(ToolCheck::is_ok);
    ToolReport { checks, all_met }
}
