//! Platform access layer
//!
//! Every stage talks to the orchestration platform through the [`Cluster`]
//! trait. The production implementation shells out to `oc` and `helm`
//! ([`oc::OcCluster`]); tests use an in-memory fake that records every
//! mutation.

pub mod oc;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use snafu::Snafu;
use std::path::Path;
use std::time::Duration;

pub use k8s_openapi::api::apps::v1::Deployment;
pub use k8s_openapi::api::core::v1::{EnvVar, Service};
pub use oc::OcCluster;

/// Errors emitted while driving the platform CLIs
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClusterError {
    #[snafu(display("Failed to execute `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` failed: {stderr}"))]
    CommandFailed { command: String, stderr: String },

    #[snafu(display("Could not decode output of `{command}`: {source}"))]
    Decode {
        command: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not prepare Helm values: {source}"))]
    Values { source: serde_yaml::Error },

    #[snafu(display("Could not write Helm values file: {source}"))]
    ValuesFile { source: std::io::Error },

    #[snafu(display("Background command task failed: {source}"))]
    Join { source: tokio::task::JoinError },
}

/// Result of waiting on a deployment rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollout {
    Complete,
    NotReady { detail: String },
}

impl Rollout {
    pub fn is_complete(&self) -> bool {
        matches!(self, Rollout::Complete)
    }
}

/// One `helm upgrade --install` invocation
#[derive(Debug, Clone)]
pub struct HelmRelease {
    pub namespace: String,
    pub name: String,
    pub chart: String,
    pub version: Option<String>,
    pub values: serde_yaml::Value,
}

/// Platform operations used by the deploy pipeline.
///
/// Probe methods (`*_exists`, `get_*`) never mutate. Create methods are not
/// required to be idempotent; the pipeline probes first.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError>;
    async fn create_namespace(&self, namespace: &str) -> Result<(), ClusterError>;

    async fn service_account_exists(&self, namespace: &str, name: &str)
    -> Result<bool, ClusterError>;
    async fn create_service_account(&self, namespace: &str, name: &str)
    -> Result<(), ClusterError>;
    /// Grant a security context constraint to a service account
    async fn grant_scc(&self, namespace: &str, account: &str, scc: &str)
    -> Result<(), ClusterError>;

    async fn apply_manifest(&self, namespace: &str, manifest: &Path) -> Result<(), ClusterError>;
    async fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
        timeout: Duration,
    ) -> Result<Rollout, ClusterError>;

    /// Install the release, or upgrade it when it already exists
    async fn helm_upgrade_install(&self, release: &HelmRelease) -> Result<(), ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str)
    -> Result<Option<Service>, ClusterError>;
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError>;
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError>;

    /// Set environment entries on a deployment in one update
    async fn set_env(
        &self,
        namespace: &str,
        deployment: &str,
        vars: &[(String, String)],
    ) -> Result<(), ClusterError>;

    async fn build_config_exists(&self, namespace: &str, name: &str)
    -> Result<bool, ClusterError>;
    async fn create_binary_build(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    /// Upload `source_dir` and block until the build finishes
    async fn start_build(
        &self,
        namespace: &str,
        name: &str,
        source_dir: &Path,
    ) -> Result<(), ClusterError>;
    /// Create a deployment from the image stream of the same name
    async fn create_app(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    /// Create a cluster-internal service in front of a deployment
    async fn expose_deployment(
        &self,
        namespace: &str,
        name: &str,
        port: u16,
    ) -> Result<(), ClusterError>;

    async fn route_host(&self, namespace: &str, name: &str)
    -> Result<Option<String>, ClusterError>;
    async fn expose_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}
