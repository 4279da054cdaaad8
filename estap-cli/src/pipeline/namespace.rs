//! Stage 1: namespace and service identity

use snafu::ResultExt;

use super::progress::Progress;
use super::{ClusterSnafu, PipelineError};
use crate::cluster::Cluster;

/// Security context constraint granted to the proxy's service account.
/// Lets the pods run as any uid; fine for a demo, not for production.
pub const RUN_AS_ANY_SCC: &str = "anyuid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceOutcome {
    pub namespace: String,
    pub created_namespace: bool,
    pub created_identity: bool,
}

/// Create the namespace and service account when absent, reuse them
/// otherwise. Create failures are reported and skipped so re-runs against a
/// half-provisioned namespace keep going.
pub async fn ensure(
    cluster: &dyn Cluster,
    progress: &Progress,
    namespace: &str,
    identity: &str,
) -> Result<NamespaceOutcome, PipelineError> {
    progress.step(format!("Ensuring namespace {namespace}"));
    let mut created_namespace = false;
    if cluster
        .namespace_exists(namespace)
        .await
        .context(ClusterSnafu)?
    {
        progress.done(format!("namespace {namespace} already exists, reusing it"));
    } else {
        match cluster.create_namespace(namespace).await {
            Ok(()) => {
                created_namespace = true;
                progress.done(format!("namespace {namespace} created"));
            }
            Err(e) => progress.warn(format!("could not create namespace {namespace}: {e}")),
        }
    }

    progress.step(format!("Ensuring service account {identity}"));
    let mut created_identity = false;
    if cluster
        .service_account_exists(namespace, identity)
        .await
        .context(ClusterSnafu)?
    {
        progress.done(format!("service account {identity} already exists"));
    } else {
        match cluster.create_service_account(namespace, identity).await {
            Ok(()) => {
                created_identity = true;
                progress.done(format!("service account {identity} created"));
            }
            Err(e) => progress.warn(format!("could not create service account {identity}: {e}")),
        }
    }

    progress.note(format!(
        "granting '{RUN_AS_ANY_SCC}' to {identity} (test convenience only, do not use in production)"
    ));
    match cluster.grant_scc(namespace, identity, RUN_AS_ANY_SCC).await {
        Ok(()) => progress.done(format!("{identity} may run as any uid")),
        Err(e) => progress.warn(format!("could not grant {RUN_AS_ANY_SCC} to {identity}: {e}")),
    }

    Ok(NamespaceOutcome {
        namespace: namespace.to_string(),
        created_namespace,
        created_identity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;

    #[tokio::test]
    async fn test_rerun_creates_nothing_new() {
        let cluster = FakeCluster::new();
        let progress = Progress::plain();

        let first = ensure(&cluster, &progress, "estap-bank-a", "estap").await.unwrap();
        assert!(first.created_namespace);
        assert!(first.created_identity);

        let second = ensure(&cluster, &progress, "estap-bank-a", "estap").await.unwrap();
        assert!(!second.created_namespace);
        assert!(!second.created_identity);

        let state = cluster.state();
        assert_eq!(state.create_calls, 2);
        assert_eq!(state.namespaces.len(), 1);
        assert_eq!(state.service_accounts.len(), 1);
        assert!(progress.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_create_failures_are_suppressed() {
        let cluster = FakeCluster::new();
        cluster.state().fail_creates = true;
        let progress = Progress::plain();

        let outcome = ensure(&cluster, &progress, "estap-bank-b", "estap").await.unwrap();
        assert!(!outcome.created_namespace);
        assert!(!outcome.created_identity);
        assert_eq!(progress.warnings().len(), 2);
        assert_eq!(cluster.state().scc_grants.len(), 1);
    }
}
