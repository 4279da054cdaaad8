//! In-memory [`Cluster`] used by the pipeline tests

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{Cluster, ClusterError, Deployment, HelmRelease, Rollout, Service};

#[derive(Debug, Default)]
pub struct FakeState {
    pub namespaces: BTreeSet<String>,
    pub service_accounts: BTreeSet<(String, String)>,
    pub scc_grants: Vec<(String, String, String)>,
    pub applied: Vec<(String, PathBuf)>,
    pub releases: Vec<HelmRelease>,
    pub services: BTreeMap<String, Vec<Service>>,
    pub deployments: BTreeMap<(String, String), Deployment>,
    pub stalled_rollouts: BTreeSet<String>,
    pub env_writes: Vec<(String, String, Vec<(String, String)>)>,
    pub build_configs: BTreeSet<(String, String)>,
    pub builds: Vec<(String, String, PathBuf)>,
    pub routes: BTreeMap<(String, String), String>,
    /// Number of `get_service` reads that still see no ingress address
    pub ingress_hidden_reads: usize,
    pub get_service_calls: usize,
    pub list_services_calls: usize,
    pub create_calls: usize,
    pub fail_creates: bool,
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_service(self, namespace: &str, service: Service) -> Self {
        self.state()
            .services
            .entry(namespace.to_string())
            .or_default()
            .push(service);
        self
    }

    pub fn with_deployment(self, namespace: &str, deployment: Deployment) -> Self {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.state()
            .deployments
            .insert((namespace.to_string(), name), deployment);
        self
    }

    fn create_guard(&self) -> Result<MutexGuard<'_, FakeState>, ClusterError> {
        let mut state = self.state();
        state.create_calls += 1;
        if state.fail_creates {
            return Err(ClusterError::CommandFailed {
                command: "oc create".to_string(),
                stderr: "AlreadyExists".to_string(),
            });
        }
        Ok(state)
    }
}

/// Build a service from its name, type, ports and optional ingress hostname
pub fn service(name: &str, type_: &str, ports: &[i32], hostname: Option<&str>) -> Service {
    let ports: Vec<_> = ports.iter().map(|p| json!({ "port": p })).collect();
    let ingress: Vec<_> = hostname.into_iter().map(|h| json!({ "hostname": h })).collect();
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name },
        "spec": { "type": type_, "ports": ports },
        "status": { "loadBalancer": { "ingress": ingress } }
    }))
    .unwrap()
}

/// Build a deployment whose first container carries `env` in order
pub fn deployment(name: &str, env: &[(&str, &str)]) -> Deployment {
    let env: Vec<_> = env
        .iter()
        .map(|(k, v)| json!({ "name": k, "value": v }))
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name },
        "spec": {
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": [{ "name": name, "image": "postgres:16", "env": env }] }
            }
        }
    }))
    .unwrap()
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError> {
        Ok(self.state().namespaces.contains(namespace))
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), ClusterError> {
        self.create_guard()?.namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self
            .state()
            .service_accounts
            .contains(&(namespace.to_string(), name.to_string())))
    }

    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.create_guard()?
            .service_accounts
            .insert((namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn grant_scc(&self, namespace: &str, account: &str, scc: &str) -> Result<(), ClusterError> {
        self.state().scc_grants.push((
            namespace.to_string(),
            account.to_string(),
            scc.to_string(),
        ));
        Ok(())
    }

    async fn apply_manifest(&self, namespace: &str, manifest: &Path) -> Result<(), ClusterError> {
        self.state()
            .applied
            .push((namespace.to_string(), manifest.to_path_buf()));
        Ok(())
    }

    async fn rollout_status(
        &self,
        _namespace: &str,
        deployment: &str,
        _timeout: Duration,
    ) -> Result<Rollout, ClusterError> {
        if self.state().stalled_rollouts.contains(deployment) {
            Ok(Rollout::NotReady {
                detail: "timed out waiting for the condition".to_string(),
            })
        } else {
            Ok(Rollout::Complete)
        }
    }

    async fn helm_upgrade_install(&self, release: &HelmRelease) -> Result<(), ClusterError> {
        self.state().releases.push(release.clone());
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        let mut state = self.state();
        state.get_service_calls += 1;
        let hide_ingress = state.ingress_hidden_reads > 0;
        if hide_ingress {
            state.ingress_hidden_reads -= 1;
        }
        let found = state
            .services
            .get(namespace)
            .and_then(|list| {
                list.iter()
                    .find(|s| s.metadata.name.as_deref() == Some(name))
            })
            .cloned();
        Ok(found.map(|mut svc| {
            if hide_ingress {
                svc.status = None;
            }
            svc
        }))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        let mut state = self.state();
        state.list_services_calls += 1;
        Ok(state.services.get(namespace).cloned().unwrap_or_default())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError> {
        Ok(self
            .state()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn set_env(
        &self,
        namespace: &str,
        deployment: &str,
        vars: &[(String, String)],
    ) -> Result<(), ClusterError> {
        self.state()
            .env_writes
            .push((namespace.to_string(), deployment.to_string(), vars.to_vec()));
        Ok(())
    }

    async fn build_config_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self
            .state()
            .build_configs
            .contains(&(namespace.to_string(), name.to_string())))
    }

    async fn create_binary_build(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.create_guard()?
            .build_configs
            .insert((namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn start_build(
        &self,
        namespace: &str,
        name: &str,
        source_dir: &Path,
    ) -> Result<(), ClusterError> {
        self.state().builds.push((
            namespace.to_string(),
            name.to_string(),
            source_dir.to_path_buf(),
        ));
        Ok(())
    }

    async fn create_app(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let created = deployment(name, &[]);
        self.create_guard()?
            .deployments
            .insert((namespace.to_string(), name.to_string()), created);
        Ok(())
    }

    async fn expose_deployment(
        &self,
        namespace: &str,
        name: &str,
        port: u16,
    ) -> Result<(), ClusterError> {
        let svc = service(name, "ClusterIP", &[i32::from(port)], None);
        self.create_guard()?
            .services
            .entry(namespace.to_string())
            .or_default()
            .push(svc);
        Ok(())
    }

    async fn route_host(&self, namespace: &str, name: &str) -> Result<Option<String>, ClusterError> {
        Ok(self
            .state()
            .routes
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn expose_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let host = format!("{name}-{namespace}.apps.example.com");
        self.create_guard()?
            .routes
            .insert((namespace.to_string(), name.to_string()), host);
        Ok(())
    }
}
