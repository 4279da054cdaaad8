//! Opening the proxy and database ports on cloud security groups

use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::pipeline::Progress;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IngressError {
    #[snafu(display("Failed to execute `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` failed: {stderr}"))]
    Rejected { command: String, stderr: String },

    #[snafu(display("Background command task failed: {source}"))]
    Join { source: tokio::task::JoinError },
}

/// Ingress rules to open: every port on every group
#[derive(Debug, Clone)]
pub struct IngressRequest {
    pub groups: Vec<String>,
    pub ports: Vec<u16>,
    pub cidr: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResult {
    pub group: String,
    pub port: u16,
    pub outcome: RuleOutcome,
}

const DUPLICATE_RULE: &str = "InvalidPermission.Duplicate";

fn authorize_args(group: &str, port: u16, cidr: &str, region: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = [
        "ec2",
        "authorize-security-group-ingress",
        "--group-id",
        group,
        "--protocol",
        "tcp",
        "--port",
    ]
    .iter()
    .map(|a| (*a).to_string())
    .collect();
    args.push(port.to_string());
    args.extend(["--cidr".to_string(), cidr.to_string()]);
    if let Some(region) = region {
        args.extend(["--region".to_string(), region.to_string()]);
    }
    args
}

/// A failed call whose error says the rule exists is not a failure
fn classify(success: bool, stderr: &str) -> Option<RuleOutcome> {
    if success {
        Some(RuleOutcome::Added)
    } else if stderr.contains(DUPLICATE_RULE) {
        Some(RuleOutcome::AlreadyPresent)
    } else {
        None
    }
}

async fn authorize(aws: &str, args: Vec<String>) -> Result<RuleOutcome, IngressError> {
    let command = format!("{aws} {}", args.join(" "));
    debug!(command = %command, "running");

    let expression = duct::cmd(aws, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked();
    let output = tokio::task::spawn_blocking(move || expression.run())
        .await
        .context(JoinSnafu)?
        .context(SpawnSnafu {
            command: command.clone(),
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    classify(output.status.success(), &stderr).ok_or(IngressError::Rejected { command, stderr })
}

/// Authorize every group x port pair; the first real failure stops the run
pub async fn open_ports(
    aws: &str,
    request: &IngressRequest,
    progress: &Progress,
) -> Result<Vec<RuleResult>, IngressError> {
    let mut results = Vec::new();
    for group in &request.groups {
        for &port in &request.ports {
            progress.step(format!(
                "Allowing tcp/{port} from {} on {group}",
                request.cidr
            ));
            let args = authorize_args(group, port, &request.cidr, request.region.as_deref());
            let outcome = authorize(aws, args).await?;
            match outcome {
                RuleOutcome::Added => progress.done(format!("{group} tcp/{port} opened")),
                RuleOutcome::AlreadyPresent => {
                    progress.note(format!("{group} tcp/{port} already open"));
                }
            }
            results.push(RuleResult {
                group: group.clone(),
                port,
                outcome,
            });
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Stand-in `aws` that reports the 5432 rule as existing and rejects sg-bad
    fn fake_aws(dir: &std::path::Path) -> String {
        let path = dir.join("aws");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             case \"$*\" in\n\
             *sg-bad*) echo 'An error occurred (InvalidGroup.NotFound)' >&2; exit 254;;\n\
             *'--port 5432'*) echo 'An error occurred (InvalidPermission.Duplicate)' >&2; exit 254;;\n\
             esac\n\
             exit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(true, ""), Some(RuleOutcome::Added));
        assert_eq!(
            classify(false, "An error occurred (InvalidPermission.Duplicate) when calling"),
            Some(RuleOutcome::AlreadyPresent)
        );
        assert_eq!(classify(false, "UnauthorizedOperation"), None);
    }

    #[test]
    fn test_authorize_args() {
        let args = authorize_args("sg-1", 8888, "10.0.0.0/8", Some("eu-west-1"));
        assert_eq!(
            args.join(" "),
            "ec2 authorize-security-group-ingress --group-id sg-1 --protocol tcp \
             --port 8888 --cidr 10.0.0.0/8 --region eu-west-1"
        );
    }

    #[tokio::test]
    async fn test_duplicate_rules_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let aws = fake_aws(dir.path());
        let request = IngressRequest {
            groups: vec!["sg-1".to_string()],
            ports: vec![8888, 5432],
            cidr: "0.0.0.0/0".to_string(),
            region: None,
        };

        let results = open_ports(&aws, &request, &Progress::plain()).await.unwrap();
        let outcomes: Vec<RuleOutcome> = results.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![RuleOutcome::Added, RuleOutcome::AlreadyPresent]);
    }

    #[tokio::test]
    async fn test_other_failures_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let aws = fake_aws(dir.path());
        let request = IngressRequest {
            groups: vec!["sg-bad".to_string(), "sg-1".to_string()],
            ports: vec![8888],
            cidr: "0.0.0.0/0".to_string(),
            region: None,
        };

        let err = open_ports(&aws, &request, &Progress::plain()).await.unwrap_err();
        match err {
            IngressError::Rejected { stderr, .. } => assert!(stderr.contains("InvalidGroup")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
