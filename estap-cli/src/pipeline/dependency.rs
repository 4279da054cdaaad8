//! Stage 2: the database the proxy fronts

use snafu::ResultExt;
use std::path::Path;
use std::time::Duration;

use super::progress::Progress;
use super::{ClusterSnafu, PipelineError};
use crate::cluster::{Cluster, Rollout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyDeployment {
    pub namespace: String,
    pub name: String,
}

/// Apply the manifest and block until `deployment` has rolled out.
/// Everything downstream needs the database, so a timeout is fatal.
pub async fn install_and_wait(
    cluster: &dyn Cluster,
    progress: &Progress,
    namespace: &str,
    manifest: &Path,
    deployment: &str,
    timeout: Duration,
) -> Result<ReadyDeployment, PipelineError> {
    progress.step(format!("Applying {}", manifest.display()));
    cluster
        .apply_manifest(namespace, manifest)
        .await
        .context(ClusterSnafu)?;
    progress.done("manifest applied");

    progress.step(format!(
        "Waiting up to {}s for deployment/{deployment}",
        timeout.as_secs()
    ));
    match cluster
        .rollout_status(namespace, deployment, timeout)
        .await
        .context(ClusterSnafu)?
    {
        Rollout::Complete => {
            progress.done(format!("{deployment} is ready"));
            Ok(ReadyDeployment {
                namespace: namespace.to_string(),
                name: deployment.to_string(),
            })
        }
        Rollout::NotReady { detail } => Err(PipelineError::RolloutNotReady {
            deployment: deployment.to_string(),
            detail,
        }),
    }
}
