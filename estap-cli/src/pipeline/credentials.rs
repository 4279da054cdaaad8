//! Database credentials read back from the live database deployment
//!
//! The deployment is fetched once. Lookup then runs an ordered list of pure
//! strategies over the first container's environment list; the first
//! non-empty value per key wins.

use estap_core::{POSTGRES_DB, POSTGRES_PASSWORD, POSTGRES_USER};
use secrecy::{ExposeSecret, SecretString};
use snafu::ResultExt;

use super::progress::Progress;
use super::{ClusterSnafu, PipelineError};
use crate::cluster::{Cluster, Deployment, EnvVar};

/// Keys in the order the demo manifest declares them
pub const CREDENTIAL_KEYS: [&str; 3] = [POSTGRES_USER, POSTGRES_DB, POSTGRES_PASSWORD];

type Lookup = fn(&[EnvVar], usize, &str) -> Option<String>;

/// Tried in order for every key
const STRATEGIES: [(&str, Lookup); 2] = [("positional", positional), ("scan", scan)];

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub database: String,
    pub secret: SecretString,
}

impl Credentials {
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

/// Entry at the conventional index, if its name matches
fn positional(env: &[EnvVar], index: usize, key: &str) -> Option<String> {
    env.get(index)
        .filter(|var| var.name == key)
        .and_then(|var| var.value.clone())
}

/// Any entry with a matching name
fn scan(env: &[EnvVar], _index: usize, key: &str) -> Option<String> {
    env.iter()
        .find(|var| var.name == key && var.value.as_deref().is_some_and(|v| !v.is_empty()))
        .and_then(|var| var.value.clone())
}

fn lookup(env: &[EnvVar], index: usize, key: &str) -> Option<String> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let value = strategy(env, index, key).filter(|v| !v.is_empty())?;
        tracing::debug!(key, strategy = *name, "credential resolved");
        Some(value)
    })
}

/// Environment list of the first container in the pod template
pub fn container_env(deployment: &Deployment) -> Vec<EnvVar> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .and_then(|container| container.env.clone())
        .unwrap_or_default()
}

/// Resolve all three values or fail naming every one that is missing
pub fn extract(env: &[EnvVar]) -> Result<Credentials, PipelineError> {
    let mut values: Vec<Option<String>> = CREDENTIAL_KEYS
        .iter()
        .enumerate()
        .map(|(index, key)| lookup(env, index, key))
        .collect();

    let missing: Vec<String> = CREDENTIAL_KEYS
        .iter()
        .zip(&values)
        .filter(|(_, value)| value.is_none())
        .map(|(key, _)| (*key).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingCredentials { missing });
    }

    let mut take = |i: usize| values[i].take().unwrap_or_default();
    Ok(Credentials {
        user: take(0),
        database: take(1),
        secret: SecretString::from(take(2)),
    })
}

/// Fetch `deployment` and extract its credentials
pub async fn read_credentials(
    cluster: &dyn Cluster,
    progress: &Progress,
    namespace: &str,
    deployment: &str,
) -> Result<Credentials, PipelineError> {
    progress.step(format!("Reading database credentials from deployment/{deployment}"));
    let found = cluster
        .get_deployment(namespace, deployment)
        .await
        .context(ClusterSnafu)?
        .ok_or_else(|| PipelineError::MissingDeployment {
            namespace: namespace.to_string(),
            name: deployment.to_string(),
        })?;

    let credentials = extract(&container_env(&found))?;
    progress.done(format!(
        "credentials for user {} on database {}",
        credentials.user, credentials.database
    ));
    Ok(credentials)
}
