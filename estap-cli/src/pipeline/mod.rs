//! The four-stage provisioning pipeline for one bank
//!
//! Stages run strictly in order, each consuming the resource state the
//! previous one left behind:
//! 1. namespace and service identity
//! 2. database manifest, waited on (fatal on timeout)
//! 3. proxy release and load-balancer endpoint (soft timeouts)
//! 4. credentials + viewer wiring

pub mod credentials;
pub mod dependency;
pub mod downstream;
pub mod namespace;
pub mod progress;
pub mod release;

use snafu::Snafu;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::cluster::{Cluster, ClusterError};
use crate::config::{BankConfig, PollSettings};
pub use progress::Progress;
pub use release::EndpointHandle;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    #[snafu(display("deployment/{deployment} did not become ready: {detail}"))]
    RolloutNotReady { deployment: String, detail: String },

    #[snafu(display(
        "no load-balancer service on port {} in namespace {namespace} (looked for {expected}, then scanned all services)",
        estap_core::ESTAP_PORT
    ))]
    NoEndpointService { namespace: String, expected: String },

    #[snafu(display("deployment/{name} not found in namespace {namespace}"))]
    MissingDeployment { namespace: String, name: String },

    #[snafu(display("database credentials unresolved: {}", missing.join(", ")))]
    MissingCredentials { missing: Vec<String> },

    #[snafu(display("refusing to configure the viewer with unresolved {}", missing.join(", ")))]
    IncompleteEnvironment { missing: Vec<String> },

    #[snafu(display("release values for {bank} are not valid chart values: {source}"))]
    ReleaseValues {
        bank: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("provisioning task for {bank} did not finish"))]
    TaskAborted { bank: String },

    #[snafu(display("{source}"))]
    Cluster { source: ClusterError },
}

/// Everything a finished bank run reports back
#[derive(Debug, Clone)]
pub struct BankOutcome {
    pub bank: String,
    pub namespace: String,
    pub endpoint: EndpointHandle,
    pub viewer_route: Option<String>,
    pub configured: bool,
    pub warnings: Vec<String>,
}

/// Provision one bank end to end
pub async fn run_bank(
    cluster: &dyn Cluster,
    bank: &BankConfig,
    polling: &PollSettings,
    progress: &Progress,
) -> Result<BankOutcome, PipelineError> {
    let ns = bank.namespace.as_str();

    progress.banner(format!("Bank {} (namespace {ns})", bank.name));

    namespace::ensure(cluster, progress, ns, &bank.service_account).await?;

    dependency::install_and_wait(
        cluster,
        progress,
        ns,
        &bank.database.manifest,
        &bank.database.deployment,
        polling.rollout_timeout(),
    )
    .await?;

    let release = release::helm_release(bank)?;
    let endpoint = release::install_or_upgrade(cluster, progress, &release, polling).await?;

    // Credentials are resolved before the viewer is touched at all
    let creds =
        credentials::read_credentials(cluster, progress, ns, &bank.database.deployment).await?;

    let standing = downstream::ensure_standing_resources(cluster, progress, ns, &bank.viewer).await?;

    let configured = if endpoint.is_resolved() {
        downstream::configure(
            cluster,
            progress,
            ns,
            &bank.viewer.name,
            &endpoint,
            &creds,
            polling.rollout_timeout(),
        )
        .await?;
        true
    } else {
        progress.warn(format!(
            "proxy address unknown, {} left unconfigured",
            bank.viewer.name
        ));
        progress.hint(format!(
            "estap endpoint {ns} --release {} --apply",
            bank.release_name()
        ));
        false
    };

    Ok(BankOutcome {
        bank: bank.name.clone(),
        namespace: bank.namespace.clone(),
        endpoint,
        viewer_route: standing.route_host,
        configured,
        warnings: progress.warnings(),
    })
}

/// Re-run endpoint resolution for an existing release. With `apply` and a
/// resolved address, the viewer is configured as the last stage would have.
pub async fn recheck_endpoint(
    cluster: &dyn Cluster,
    bank: &BankConfig,
    release: &str,
    polling: &PollSettings,
    apply: bool,
    progress: &Progress,
) -> Result<EndpointHandle, PipelineError> {
    let ns = bank.namespace.as_str();
    let endpoint = release::resolve_endpoint(cluster, progress, ns, release, polling).await?;

    if !apply {
        return Ok(endpoint);
    }
    if !endpoint.is_resolved() {
        progress.note(format!("{} left unconfigured", bank.viewer.name));
        return Ok(endpoint);
    }

    let creds =
        credentials::read_credentials(cluster, progress, ns, &bank.database.deployment).await?;
    downstream::configure(
        cluster,
        progress,
        ns,
        &bank.viewer.name,
        &endpoint,
        &creds,
        polling.rollout_timeout(),
    )
    .await?;
    Ok(endpoint)
}

/// Provision every bank, one after the other or as one task per bank.
/// Results come back in bank order either way.
pub async fn run_banks(
    cluster: Arc<dyn Cluster>,
    banks: &[BankConfig],
    polling: &PollSettings,
    parallel: bool,
) -> Vec<(String, Result<BankOutcome, PipelineError>)> {
    if !parallel {
        let mut results = Vec::with_capacity(banks.len());
        for bank in banks {
            let progress = Progress::plain();
            let result = run_bank(cluster.as_ref(), bank, polling, &progress).await;
            results.push((bank.name.clone(), result));
        }
        return results;
    }

    let mut tasks = JoinSet::new();
    for (index, bank) in banks.iter().cloned().enumerate() {
        let cluster = Arc::clone(&cluster);
        let polling = polling.clone();
        tasks.spawn(async move {
            let progress = Progress::labelled(&bank.name);
            let result = run_bank(cluster.as_ref(), &bank, &polling, &progress).await;
            (index, bank.name, result)
        });
    }

    let mut results: Vec<Option<(String, Result<BankOutcome, PipelineError>)>> =
        (0..banks.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, name, result)) => results[index] = Some((name, result)),
            Err(e) => tracing::error!("bank task failed: {e}"),
        }
    }

    results
        .into_iter()
        .zip(banks)
        .map(|(slot, bank)| {
            slot.unwrap_or_else(|| {
                (
                    bank.name.clone(),
                    Err(PipelineError::TaskAborted {
                        bank: bank.name.clone(),
                    }),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{FakeCluster, deployment, service};
    use estap_core::{POSTGRES_DB, POSTGRES_PASSWORD, POSTGRES_USER};

    fn polling() -> PollSettings {
        PollSettings {
            rollout_timeout_secs: 1,
            address_attempts: 2,
            address_interval_secs: 0,
        }
    }

    fn database(password: &str) -> crate::cluster::Deployment {
        deployment(
            "postgres",
            &[
                (POSTGRES_USER, "bank"),
                (POSTGRES_DB, "ledger"),
                (POSTGRES_PASSWORD, password),
            ],
        )
    }

    #[tokio::test]
    async fn test_full_run_configures_viewer() {
        let bank = BankConfig::named("bank-a", "estap-bank-a");
        let cluster = FakeCluster::new()
            .with_deployment("estap-bank-a", database("s3cret"))
            .with_service(
                "estap-bank-a",
                service("bank-a-estap-lb", "LoadBalancer", &[8888], Some("lb.example.com")),
            );

        let outcome = run_bank(&cluster, &bank, &polling(), &Progress::plain())
            .await
            .unwrap();
        assert!(outcome.configured);
        assert_eq!(outcome.endpoint.host, "lb.example.com");
        assert!(outcome.viewer_route.is_some());
        assert!(outcome.warnings.is_empty());

        let state = cluster.state();
        assert_eq!(state.env_writes.len(), 1);
        assert_eq!(state.env_writes[0].1, "pg-viewer");
    }

    #[tokio::test]
    async fn test_missing_endpoint_service_halts_before_viewer() {
        let bank = BankConfig::named("bank-a", "estap-bank-a");
        let cluster = FakeCluster::new().with_deployment("estap-bank-a", database("s3cret"));

        let err = run_bank(&cluster, &bank, &polling(), &Progress::plain())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoEndpointService { .. }));

        let state = cluster.state();
        assert!(state.env_writes.is_empty());
        assert!(state.builds.is_empty());
    }

    #[tokio::test]
    async fn test_empty_secret_halts_before_viewer() {
        let bank = BankConfig::named("bank-a", "estap-bank-a");
        let cluster = FakeCluster::new()
            .with_deployment("estap-bank-a", database(""))
            .with_service(
                "estap-bank-a",
                service("bank-a-estap-lb", "LoadBalancer", &[8888], Some("lb")),
            );

        let err = run_bank(&cluster, &bank, &polling(), &Progress::plain())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingCredentials { .. }));
        assert!(cluster.state().env_writes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_address_skips_wiring() {
        let bank = BankConfig::named("bank-a", "estap-bank-a");
        let cluster = FakeCluster::new()
            .with_deployment("estap-bank-a", database("s3cret"))
            .with_service(
                "estap-bank-a",
                service("bank-a-estap-lb", "LoadBalancer", &[8888], None),
            );

        let outcome = run_bank(&cluster, &bank, &polling(), &Progress::plain())
            .await
            .unwrap();
        assert!(!outcome.configured);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(cluster.state().env_writes.is_empty());
    }

    #[tokio::test]
    async fn test_recheck_applies_once_address_exists() {
        let bank = BankConfig::named("bank-a", "estap-bank-a");
        let cluster = FakeCluster::new()
            .with_deployment("estap-bank-a", database("s3cret"))
            .with_service(
                "estap-bank-a",
                service("bank-a-estap-lb", "LoadBalancer", &[8888], Some("lb")),
            );
        let progress = Progress::plain();

        let endpoint = recheck_endpoint(&cluster, &bank, "bank-a", &polling(), false, &progress)
            .await
            .unwrap();
        assert_eq!(endpoint.host, "lb");
        assert!(cluster.state().env_writes.is_empty());

        recheck_endpoint(&cluster, &bank, "bank-a", &polling(), true, &progress)
            .await
            .unwrap();
        assert_eq!(cluster.state().env_writes.len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_banks_keep_order() {
        let banks = vec![
            BankConfig::named("bank-a", "estap-bank-a"),
            BankConfig::named("bank-b", "estap-bank-b"),
        ];
        let cluster = FakeCluster::new()
            .with_deployment("estap-bank-a", database("a"))
            .with_deployment("estap-bank-b", database("b"))
            .with_service(
                "estap-bank-a",
                service("bank-a-estap-lb", "LoadBalancer", &[8888], Some("a.lb")),
            )
            .with_service(
                "estap-bank-b",
                service("bank-b-estap-lb", "LoadBalancer", &[8888], Some("b.lb")),
            );
        let cluster: Arc<dyn Cluster> = Arc::new(cluster);

        let results = run_banks(cluster, &banks, &polling(), true).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "bank-a");
        assert_eq!(results[1].0, "bank-b");
        assert_eq!(results[0].1.as_ref().unwrap().endpoint.host, "a.lb");
        assert_eq!(results[1].1.as_ref().unwrap().endpoint.host, "b.lb");
    }
}
