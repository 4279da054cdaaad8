//! Stage 4: the viewer app that consumes the proxy
//!
//! The viewer gets its connection through the libpq environment contract.
//! All five entries are written in a single update, and only once every one
//! of them is known.

use estap_core::{ESTAP_PORT, PGDATABASE, PGHOST, PGPASSWORD, PGPORT, PGUSER};
use snafu::ResultExt;
use std::time::Duration;

use super::credentials::Credentials;
use super::progress::Progress;
use super::release::EndpointHandle;
use super::{ClusterSnafu, PipelineError};
use crate::cluster::{Cluster, Rollout};
use crate::config::ViewerConfig;

/// What the standing-resource pass found or created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandingResources {
    pub created_build: bool,
    pub created_app: bool,
    pub created_service: bool,
    pub created_route: bool,
    pub route_host: Option<String>,
}

/// Build the environment for the viewer. Refuses to produce anything when
/// the endpoint or any credential is unresolved.
pub fn downstream_env(
    endpoint: &EndpointHandle,
    credentials: &Credentials,
) -> Result<Vec<(String, String)>, PipelineError> {
    let mut missing = Vec::new();
    if endpoint.host.is_empty() {
        missing.push(PGHOST.to_string());
    }
    if credentials.user.is_empty() {
        missing.push(PGUSER.to_string());
    }
    if credentials.secret().is_empty() {
        missing.push(PGPASSWORD.to_string());
    }
    if credentials.database.is_empty() {
        missing.push(PGDATABASE.to_string());
    }
    if !missing.is_empty() {
        return Err(PipelineError::IncompleteEnvironment { missing });
    }

    Ok(vec![
        (PGHOST.to_string(), endpoint.host.clone()),
        (PGPORT.to_string(), ESTAP_PORT.to_string()),
        (PGUSER.to_string(), credentials.user.clone()),
        (PGPASSWORD.to_string(), credentials.secret().to_string()),
        (PGDATABASE.to_string(), credentials.database.clone()),
    ])
}

/// Make sure the viewer's image, deployment, service and route exist.
/// The build runs on every invocation so source changes are picked up;
/// service and route are created once and left alone afterwards.
pub async fn ensure_standing_resources(
    cluster: &dyn Cluster,
    progress: &Progress,
    namespace: &str,
    viewer: &ViewerConfig,
) -> Result<StandingResources, PipelineError> {
    let name = viewer.name.as_str();
    let mut resources = StandingResources::default();

    progress.step(format!("Building image {name} from {}", viewer.source_dir.display()));
    if !cluster
        .build_config_exists(namespace, name)
        .await
        .context(ClusterSnafu)?
    {
        cluster
            .create_binary_build(namespace, name)
            .await
            .context(ClusterSnafu)?;
        resources.created_build = true;
    }
    cluster
        .start_build(namespace, name, &viewer.source_dir)
        .await
        .context(ClusterSnafu)?;
    progress.done(format!("image {name} built"));

    if cluster
        .get_deployment(namespace, name)
        .await
        .context(ClusterSnafu)?
        .is_none()
    {
        progress.step(format!("Creating deployment {name}"));
        cluster.create_app(namespace, name).await.context(ClusterSnafu)?;
        resources.created_app = true;
        progress.done(format!("deployment {name} created"));
    }

    if cluster
        .get_service(namespace, name)
        .await
        .context(ClusterSnafu)?
        .is_none()
    {
        progress.step(format!("Creating service {name} on port {}", viewer.port));
        cluster
            .expose_deployment(namespace, name, viewer.port)
            .await
            .context(ClusterSnafu)?;
        resources.created_service = true;
        progress.done(format!("service {name} created"));
    } else {
        progress.note(format!("service {name} already exists, leaving it unchanged"));
    }

    let mut route = cluster.route_host(namespace, name).await.context(ClusterSnafu)?;
    if route.is_none() {
        progress.step(format!("Creating route {name}"));
        cluster.expose_service(namespace, name).await.context(ClusterSnafu)?;
        resources.created_route = true;
        route = cluster.route_host(namespace, name).await.context(ClusterSnafu)?;
        progress.done(format!("route {name} created"));
    } else {
        progress.note(format!("route {name} already exists, leaving it unchanged"));
    }
    resources.route_host = route;

    Ok(resources)
}

/// Inject the connection into the viewer and wait for the new rollout.
/// A slow rollout is only a warning; the pods usually catch up shortly.
pub async fn configure(
    cluster: &dyn Cluster,
    progress: &Progress,
    namespace: &str,
    deployment: &str,
    endpoint: &EndpointHandle,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let env = downstream_env(endpoint, credentials)?;

    progress.step(format!(
        "Pointing {deployment} at {}:{}",
        endpoint.host, endpoint.port
    ));
    cluster
        .set_env(namespace, deployment, &env)
        .await
        .context(ClusterSnafu)?;
    progress.done(format!(
        "{PGHOST}, {PGPORT}, {PGUSER}, {PGPASSWORD}, {PGDATABASE} set on {deployment}"
    ));

    progress.step(format!(
        "Waiting up to {}s for deployment/{deployment}",
        timeout.as_secs()
    ));
    match cluster
        .rollout_status(namespace, deployment, timeout)
        .await
        .context(ClusterSnafu)?
    {
        Rollout::Complete => progress.done(format!("{deployment} is ready")),
        Rollout::NotReady { detail } => {
            progress.warn(format!("{deployment} not ready yet ({detail})"));
            progress.hint(format!("oc rollout status deployment/{deployment} -n {namespace}"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use secrecy::SecretString;

    fn endpoint(host: &str) -> EndpointHandle {
        EndpointHandle {
            service: "bank-a-estap-lb".to_string(),
            host: host.to_string(),
            port: ESTAP_PORT,
        }
    }

    fn credentials(secret: &str) -> Credentials {
        Credentials {
            user: "bank".to_string(),
            database: "ledger".to_string(),
            secret: SecretString::from(secret.to_string()),
        }
    }

    #[tokio::test]
    async fn test_configure_sets_all_five() {
        let cluster = FakeCluster::new();
        configure(
            &cluster,
            &Progress::plain(),
            "ns",
            "pg-viewer",
            &endpoint("lb.example.com"),
            &credentials("s3cret"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let state = cluster.state();
        assert_eq!(state.env_writes.len(), 1);
        let (_, deployment, vars) = &state.env_writes[0];
        assert_eq!(deployment, "pg-viewer");
        let keys: Vec<&str> = vars.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE]);
        assert_eq!(vars[1].1, "8888");
    }

    #[tokio::test]
    async fn test_empty_secret_writes_nothing() {
        let cluster = FakeCluster::new();
        let err = configure(
            &cluster,
            &Progress::plain(),
            "ns",
            "pg-viewer",
            &endpoint("lb.example.com"),
            &credentials(""),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::IncompleteEnvironment { .. }));
        assert!(cluster.state().env_writes.is_empty());
    }

    #[test]
    fn test_unresolved_host_is_rejected() {
        let err = downstream_env(&endpoint(""), &credentials("s3cret")).unwrap_err();
        match err {
            PipelineError::IncompleteEnvironment { missing } => {
                assert_eq!(missing, vec![PGHOST.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_standing_resources_created_once() {
        let cluster = FakeCluster::new();
        let viewer = ViewerConfig::default();
        let progress = Progress::plain();

        let first = ensure_standing_resources(&cluster, &progress, "ns", &viewer)
            .await
            .unwrap();
        assert!(first.created_build && first.created_app);
        assert!(first.created_service && first.created_route);
        assert_eq!(
            first.route_host.as_deref(),
            Some("pg-viewer-ns.apps.example.com")
        );

        let second = ensure_standing_resources(&cluster, &progress, "ns", &viewer)
            .await
            .unwrap();
        assert_eq!(
            second,
            StandingResources {
                route_host: first.route_host.clone(),
                ..StandingResources::default()
            }
        );

        let state = cluster.state();
        assert_eq!(state.builds.len(), 2);
        assert_eq!(state.routes.len(), 1);
        assert_eq!(state.services["ns"].len(), 1);
    }
}
