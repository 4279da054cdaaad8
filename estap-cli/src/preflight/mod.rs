//! Preconditions checked before the first mutation
//!
//! - external binaries present and new enough
//! - platform session logged in
//! - local files the command reads actually exist

pub mod session;
pub mod tools;

use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::ToolSpec;
pub use session::{Session, check_session};
pub use tools::{ToolCheck, ToolReport, check_tools};

/// What a command needs before it may run
#[derive(Debug, Default)]
pub struct Requirements<'a> {
    pub tools: Vec<&'a str>,
    /// Platform CLI to ask for the session, if any
    pub session: Option<&'a str>,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct PreflightReport {
    pub tools: ToolReport,
    pub session: Option<Session>,
    pub missing_paths: Vec<PathBuf>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.tools.all_met
            && self.session.as_ref().is_none_or(Session::is_logged_in)
            && self.missing_paths.is_empty()
    }

    pub fn print(&self) {
        if !self.tools.checks.is_empty() {
            println!("📦 Tools:");
            self.tools.print();
        }
        match &self.session {
            Some(Session::LoggedIn { user }) => println!("  ✅ logged in as {user}"),
            Some(Session::LoggedOut { detail }) => {
                println!("  ❌ not logged in to the platform ({detail}) - run `oc login`");
            }
            None => {}
        }
        for path in &self.missing_paths {
            println!("  ❌ missing: {}", path.display());
        }
    }

    /// Fail with every unmet precondition named
    pub fn ensure(&self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }

        let mut problems: Vec<String> = self
            .tools
            .missing()
            .iter()
            .map(|check| match &check.installed_version {
                Some(v) => format!("{} {v} does not satisfy {}", check.name, check.required_version),
                None => format!("{} not found on PATH", check.name),
            })
            .collect();
        if let Some(Session::LoggedOut { .. }) = &self.session {
            problems.push("not logged in (oc whoami failed)".to_string());
        }
        problems.extend(
            self.missing_paths
                .iter()
                .map(|p| format!("{} does not exist", p.display())),
        );
        bail!("preconditions not met: {}", problems.join("; "))
    }
}

/// Run every check in `requirements`
pub fn check(requirements: &Requirements<'_>, specs: &BTreeMap<String, ToolSpec>) -> PreflightReport {
    let tools = check_tools(&requirements.tools, specs);
    // No point asking a binary that is not there
    let session = requirements.session.map(|oc| {
        if tools.checks.iter().any(|c| c.name == oc && !c.found) {
            Session::LoggedOut {
                detail: format!("{oc} not installed"),
            }
        } else {
            check_session(oc)
        }
    });
    let missing_paths = requirements
        .paths
        .iter()
        .filter(|p| !p.exists())
        .cloned()
        .collect();

    PreflightReport {
        tools,
        session,
        missing_paths,
    }
}
