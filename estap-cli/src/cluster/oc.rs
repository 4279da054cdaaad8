//! [`Cluster`] implementation backed by the `oc` and `helm` binaries

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{
    Cluster, ClusterError, CommandFailedSnafu, DecodeSnafu, Deployment, HelmRelease, JoinSnafu,
    Rollout, Service, SpawnSnafu, ValuesFileSnafu, ValuesSnafu,
};

/// Captured result of one external command
#[derive(Debug)]
struct Captured {
    success: bool,
    stdout: String,
    stderr: String,
}

#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Shells out to the platform CLIs. Each call runs on the blocking pool so
/// that independent banks can be provisioned from separate tasks.
#[derive(Debug, Clone)]
pub struct OcCluster {
    oc: String,
    helm: String,
}

impl Default for OcCluster {
    fn default() -> Self {
        Self::new("oc", "helm")
    }
}

impl OcCluster {
    pub fn new(oc: impl Into<String>, helm: impl Into<String>) -> Self {
        Self {
            oc: oc.into(),
            helm: helm.into(),
        }
    }

    async fn exec(
        &self,
        program: &str,
        args: Vec<String>,
        stdin: Option<Vec<u8>>,
        stream_stdout: bool,
    ) -> Result<Captured, ClusterError> {
        let command = format!("{program} {}", args.join(" "));
        debug!(command = %command, "running");

        let program = program.to_string();
        let spawn_command = command.clone();
        let output = tokio::task::spawn_blocking(move || {
            let mut expr = duct::cmd(program, args).stderr_capture().unchecked();
            if !stream_stdout {
                expr = expr.stdout_capture();
            }
            if let Some(bytes) = stdin {
                expr = expr.stdin_bytes(bytes);
            }
            expr.run()
        })
        .await
        .context(JoinSnafu)?
        .context(SpawnSnafu {
            command: spawn_command,
        })?;

        let captured = Captured {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        debug!(command = %command, success = captured.success, "finished");
        Ok(captured)
    }

    /// Run `oc`, failing on non-zero exit
    async fn oc(&self, args: &[&str]) -> Result<String, ClusterError> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        let command = format!("{} {}", self.oc, args.join(" "));
        let out = self.exec(&self.oc, args, None, false).await?;
        if !out.success {
            return CommandFailedSnafu {
                command,
                stderr: out.stderr,
            }
            .fail();
        }
        Ok(out.stdout)
    }

    /// Run `oc` and report only whether it succeeded
    async fn oc_probe(&self, args: &[&str]) -> Result<bool, ClusterError> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        Ok(self.exec(&self.oc, args, None, false).await?.success)
    }

    /// `oc get ... -o json`, mapping NotFound to `None`
    async fn oc_get<T: DeserializeOwned>(&self, args: &[&str]) -> Result<Option<T>, ClusterError> {
        let mut full: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        full.extend(["-o".to_string(), "json".to_string()]);
        let command = format!("{} {}", self.oc, full.join(" "));

        let out = self.exec(&self.oc, full, None, false).await?;
        if !out.success {
            if is_not_found(&out.stderr) {
                return Ok(None);
            }
            return CommandFailedSnafu {
                command,
                stderr: out.stderr,
            }
            .fail();
        }

        serde_json::from_str(&out.stdout)
            .map(Some)
            .context(DecodeSnafu { command })
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

/// Render `KEY=VALUE` lines for `oc set env -e -`
fn env_file(vars: &[(String, String)]) -> Vec<u8> {
    let mut body = String::new();
    for (key, value) in vars {
        body.push_str(key);
        body.push('=');
        body.push_str(value);
        body.push('\n');
    }
    body.into_bytes()
}

#[async_trait]
impl Cluster for OcCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError> {
        self.oc_probe(&["get", "project", namespace]).await
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), ClusterError> {
        self.oc(&["new-project", namespace, "--skip-config-write"])
            .await
            .map(drop)
    }

    async fn service_account_exists(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ClusterError> {
        self.oc_probe(&["get", "serviceaccount", name, "-n", namespace])
            .await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.oc(&["create", "serviceaccount", name, "-n", namespace])
            .await
            .map(drop)
    }

    async fn grant_scc(&self, namespace: &str, account: &str, scc: &str) -> Result<(), ClusterError> {
        self.oc(&["adm", "policy", "add-scc-to-user", scc, "-z", account, "-n", namespace])
            .await
            .map(drop)
    }

    async fn apply_manifest(&self, namespace: &str, manifest: &Path) -> Result<(), ClusterError> {
        let manifest = manifest.to_string_lossy();
        self.oc(&["apply", "-f", manifest.as_ref(), "-n", namespace])
            .await
            .map(drop)
    }

    async fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
        timeout: Duration,
    ) -> Result<Rollout, ClusterError> {
        let target = format!("deployment/{deployment}");
        let timeout = format!("--timeout={}s", timeout.as_secs());
        let args = ["rollout", "status", target.as_str(), "-n", namespace, timeout.as_str()]
            .iter()
            .map(|a| (*a).to_string())
            .collect();

        let out = self.exec(&self.oc, args, None, false).await?;
        if out.success {
            Ok(Rollout::Complete)
        } else {
            Ok(Rollout::NotReady { detail: out.stderr })
        }
    }

    async fn helm_upgrade_install(&self, release: &HelmRelease) -> Result<(), ClusterError> {
        let yaml = serde_yaml::to_string(&release.values).context(ValuesSnafu)?;
        let mut values_file = tempfile::Builder::new()
            .prefix("estap-values-")
            .suffix(".yaml")
            .tempfile()
            .context(ValuesFileSnafu)?;
        values_file
            .write_all(yaml.as_bytes())
            .context(ValuesFileSnafu)?;

        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            release.name.clone(),
            release.chart.clone(),
            "-n".to_string(),
            release.namespace.clone(),
            "-f".to_string(),
            values_file.path().to_string_lossy().into_owned(),
        ];
        if let Some(version) = &release.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }

        let command = format!("{} {}", self.helm, args.join(" "));
        let out = self.exec(&self.helm, args, None, false).await?;
        // values_file lives until here so helm can read it
        drop(values_file);
        if !out.success {
            return CommandFailedSnafu {
                command,
                stderr: out.stderr,
            }
            .fail();
        }
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        self.oc_get(&["get", "service", name, "-n", namespace]).await
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        let list: Option<ItemList<Service>> =
            self.oc_get(&["get", "services", "-n", namespace]).await?;
        Ok(list.map(|l| l.items).unwrap_or_default())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError> {
        self.oc_get(&["get", "deployment", name, "-n", namespace])
            .await
    }

    async fn set_env(
        &self,
        namespace: &str,
        deployment: &str,
        vars: &[(String, String)],
    ) -> Result<(), ClusterError> {
        let target = format!("deployment/{deployment}");
        let args: Vec<String> = ["set", "env", target.as_str(), "-n", namespace, "-e", "-"]
            .iter()
            .map(|a| (*a).to_string())
            .collect();
        // Values travel on stdin so the secret never shows up in `ps`
        let command = format!("{} {}", self.oc, args.join(" "));
        let out = self
            .exec(&self.oc, args, Some(env_file(vars)), false)
            .await?;
        if !out.success {
            return CommandFailedSnafu {
                command,
                stderr: out.stderr,
            }
            .fail();
        }
        Ok(())
    }

    async fn build_config_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.oc_probe(&["get", "buildconfig", name, "-n", namespace])
            .await
    }

    async fn create_binary_build(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let name_arg = format!("--name={name}");
        self.oc(&[
            "new-build",
            "--binary",
            "--strategy=docker",
            name_arg.as_str(),
            "-n",
            namespace,
        ])
        .await
        .map(drop)
    }

    async fn start_build(
        &self,
        namespace: &str,
        name: &str,
        source_dir: &Path,
    ) -> Result<(), ClusterError> {
        let from_dir = format!("--from-dir={}", source_dir.display());
        let args: Vec<String> = [
            "start-build",
            name,
            from_dir.as_str(),
            "--follow",
            "--wait",
            "-n",
            namespace,
        ]
        .iter()
        .map(|a| (*a).to_string())
        .collect();

        let command = format!("{} {}", self.oc, args.join(" "));
        // Build logs stream straight to the terminal
        let out = self.exec(&self.oc, args, None, true).await?;
        if !out.success {
            return CommandFailedSnafu {
                command,
                stderr: out.stderr,
            }
            .fail();
        }
        Ok(())
    }

    async fn create_app(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let image_stream = format!("--image-stream={name}:latest");
        let name_arg = format!("--name={name}");
        self.oc(&["new-app", image_stream.as_str(), name_arg.as_str(), "-n", namespace])
            .await
            .map(drop)
    }

    async fn expose_deployment(
        &self,
        namespace: &str,
        name: &str,
        port: u16,
    ) -> Result<(), ClusterError> {
        let target = format!("deployment/{name}");
        let port = format!("--port={port}");
        self.oc(&["expose", target.as_str(), port.as_str(), "-n", namespace])
            .await
            .map(drop)
    }

    async fn route_host(&self, namespace: &str, name: &str) -> Result<Option<String>, ClusterError> {
        let args: Vec<String> = [
            "get",
            "route",
            name,
            "-n",
            namespace,
            "-o",
            "jsonpath={.spec.host}",
        ]
        .iter()
        .map(|a| (*a).to_string())
        .collect();

        let out = self.exec(&self.oc, args, None, false).await?;
        if !out.success {
            return Ok(None);
        }
        let host = out.stdout.trim();
        Ok((!host.is_empty()).then(|| host.to_string()))
    }

    async fn expose_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let target = format!("service/{name}");
        self.oc(&["expose", target.as_str(), "-n", namespace])
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_file_format() {
        let body = env_file(&[
            ("PGHOST".to_string(), "lb.example.com".to_string()),
            ("PGPORT".to_string(), "8888".to_string()),
        ]);
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "PGHOST=lb.example.com\nPGPORT=8888\n"
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(
            "Error from server (NotFound): services \"bank-a-estap-lb\" not found"
        ));
        assert!(!is_not_found("error: You must be logged in to the server (Unauthorized)"));
    }

    #[test]
    fn test_item_list_decodes_services() {
        let raw = serde_json::json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [{
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": { "name": "postgres" },
                "spec": { "type": "ClusterIP", "ports": [{ "port": 5432 }] }
            }]
        });
        let list: ItemList<Service> = serde_json::from_value(raw).unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metadata.name.as_deref(), Some("postgres"));
    }
}
