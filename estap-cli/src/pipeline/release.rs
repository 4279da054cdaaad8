//! Stage 3: the estap proxy release and its load-balancer endpoint
//!
//! The external address of the proxy is provisioned asynchronously by the
//! cloud provider. Resolution therefore never blocks forever: the service
//! itself must exist (fatal otherwise), but an address that has not shown up
//! after the polling budget is reported as a warning with a manual re-check
//! command and an empty host.

use estap_core::{ESTAP_PORT, LOAD_BALANCER_TYPE, deployment_name, load_balancer_name};
use serde_yaml::{Mapping, Value};
use snafu::ResultExt;
use tokio::time::sleep;

use super::progress::Progress;
use super::{ClusterSnafu, PipelineError, ReleaseValuesSnafu};
use crate::cluster::{Cluster, HelmRelease, Rollout, Service};
use crate::config::{BankConfig, PollSettings};

/// Externally reachable proxy address. `host` is empty while the load
/// balancer is still provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHandle {
    pub service: String,
    pub host: String,
    pub port: u16,
}

impl EndpointHandle {
    pub fn is_resolved(&self) -> bool {
        !self.host.is_empty()
    }
}

/// How the load-balancer service was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMatch {
    ExactName,
    Scan,
}

fn mapping<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Mapping(
        entries
            .into_iter()
            .map(|(key, value)| (Value::from(key), value))
            .collect::<Mapping>(),
    )
}

/// Helm release for a bank, values generated from the bank layout and
/// overlaid with the values table from the config file
pub fn helm_release(bank: &BankConfig) -> Result<HelmRelease, PipelineError> {
    let database_host = format!("{}.{}.svc", bank.database.deployment, bank.namespace);
    let generated = mapping([
        (
            "serviceAccount",
            mapping([
                ("create", Value::from(false)),
                ("name", Value::from(bank.service_account.as_str())),
            ]),
        ),
        (
            "service",
            mapping([
                ("type", Value::from(LOAD_BALANCER_TYPE)),
                ("port", Value::from(ESTAP_PORT)),
            ]),
        ),
        (
            "postgres",
            mapping([
                ("host", Value::from(database_host)),
                ("port", Value::from(bank.database.port)),
            ]),
        ),
    ]);

    let overlay = serde_yaml::to_value(&bank.release.values).context(ReleaseValuesSnafu {
        bank: bank.name.clone(),
    })?;

    Ok(HelmRelease {
        namespace: bank.namespace.clone(),
        name: bank.release_name().to_string(),
        chart: bank.release.chart.clone(),
        version: bank.release.version.clone(),
        values: merge_values(generated, overlay),
    })
}

/// Deep-merge `overlay` into `base`; overlay scalars win
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Install or upgrade the release, then resolve its endpoint
pub async fn install_or_upgrade(
    cluster: &dyn Cluster,
    progress: &Progress,
    release: &HelmRelease,
    polling: &PollSettings,
) -> Result<EndpointHandle, PipelineError> {
    progress.step(format!(
        "Installing or upgrading release {} from {}",
        release.name, release.chart
    ));
    cluster
        .helm_upgrade_install(release)
        .await
        .context(ClusterSnafu)?;
    progress.done(format!("release {} applied", release.name));

    let deployment = deployment_name(&release.name);
    progress.step(format!(
        "Waiting up to {}s for deployment/{deployment}",
        polling.rollout_timeout_secs
    ));
    match cluster
        .rollout_status(&release.namespace, &deployment, polling.rollout_timeout())
        .await
        .context(ClusterSnafu)?
    {
        Rollout::Complete => progress.done(format!("{deployment} is ready")),
        // The load balancer provisions independently of pod readiness
        Rollout::NotReady { detail } => {
            progress.warn(format!("{deployment} not ready yet ({detail}), continuing"));
            progress.hint(format!(
                "oc rollout status deployment/{deployment} -n {}",
                release.namespace
            ));
        }
    }

    resolve_endpoint(cluster, progress, &release.namespace, &release.name, polling).await
}

/// Locate the load-balancer service of `release` and wait for its address
pub async fn resolve_endpoint(
    cluster: &dyn Cluster,
    progress: &Progress,
    namespace: &str,
    release: &str,
    polling: &PollSettings,
) -> Result<EndpointHandle, PipelineError> {
    progress.step(format!("Locating the load-balancer service of {release}"));
    let (service, matched) = locate_service(cluster, namespace, release).await?;
    let name = service.metadata.name.clone().unwrap_or_default();
    match matched {
        ServiceMatch::ExactName => progress.done(format!("found service {name}")),
        ServiceMatch::Scan => progress.done(format!(
            "found service {name} by scanning for a {LOAD_BALANCER_TYPE} on port {ESTAP_PORT}"
        )),
    }

    let host = match ingress_address(&service) {
        Some(host) => Some(host),
        None => wait_for_address(cluster, progress, namespace, &name, polling).await?,
    };

    match host {
        Some(host) => {
            progress.done(format!("proxy reachable at {host}:{ESTAP_PORT}"));
            Ok(EndpointHandle {
                service: name,
                host,
                port: ESTAP_PORT,
            })
        }
        None => {
            progress.warn(format!(
                "service {name} has no external address after {} checks",
                polling.address_attempts
            ));
            progress.hint(recheck_command(namespace, &name));
            Ok(EndpointHandle {
                service: name,
                host: String::new(),
                port: ESTAP_PORT,
            })
        }
    }
}

/// Exact conventional name first, then the first load balancer exposing
/// the proxy port
pub async fn locate_service(
    cluster: &dyn Cluster,
    namespace: &str,
    release: &str,
) -> Result<(Service, ServiceMatch), PipelineError> {
    let conventional = load_balancer_name(release);
    if let Some(service) = cluster
        .get_service(namespace, &conventional)
        .await
        .context(ClusterSnafu)?
    {
        return Ok((service, ServiceMatch::ExactName));
    }

    let services = cluster.list_services(namespace).await.context(ClusterSnafu)?;
    services
        .into_iter()
        .find(|svc| is_load_balancer(svc) && exposes_port(svc, ESTAP_PORT))
        .map(|svc| (svc, ServiceMatch::Scan))
        .ok_or_else(|| PipelineError::NoEndpointService {
            namespace: namespace.to_string(),
            expected: conventional,
        })
}

async fn wait_for_address(
    cluster: &dyn Cluster,
    progress: &Progress,
    namespace: &str,
    service: &str,
    polling: &PollSettings,
) -> Result<Option<String>, PipelineError> {
    progress.step(format!(
        "Waiting for an external address on {service} ({} x {}s)",
        polling.address_attempts, polling.address_interval_secs
    ));

    for attempt in 1..=polling.address_attempts {
        let current = cluster
            .get_service(namespace, service)
            .await
            .context(ClusterSnafu)?;
        if let Some(address) = current.as_ref().and_then(ingress_address) {
            return Ok(Some(address));
        }
        tracing::debug!(service, attempt, "no ingress address yet");
        if attempt < polling.address_attempts {
            sleep(polling.address_interval()).await;
        }
    }

    Ok(None)
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == LOAD_BALANCER_TYPE)
}

fn exposes_port(service: &Service, port: u16) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .is_some_and(|ports| ports.iter().any(|p| p.port == i32::from(port)))
}

/// DNS hostname if the provider assigned one, otherwise the IP
pub fn ingress_address(service: &Service) -> Option<String> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?;

    ingress
        .iter()
        .find_map(|i| i.hostname.clone().filter(|h| !h.is_empty()))
        .or_else(|| {
            ingress
                .iter()
                .find_map(|i| i.ip.clone().filter(|ip| !ip.is_empty()))
        })
}

/// Shell command that prints the address once the provider assigns it
pub fn recheck_command(namespace: &str, service: &str) -> String {
    format!(
        "oc get service {service} -n {namespace} -o jsonpath='{{.status.loadBalancer.ingress[0].hostname}}{{.status.loadBalancer.ingress[0].ip}}'"
    )
}
