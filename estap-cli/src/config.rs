//! Deploy configuration loaded from `estap.toml`
//!
//! The file is optional: without it the tool provisions the two demo banks
//! from the repository root, using `manifests/postgres.yaml`, the bundled
//! `charts/estap` chart and the root `Dockerfile` for the viewer build. The
//! bundled chart still needs the proxy image, set with
//! `[bank.release.values.image] repository = "..."`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Root of `estap.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    #[serde(rename = "bank")]
    pub banks: Vec<BankConfig>,
    pub polling: PollSettings,
    pub tools: BTreeMap<String, ToolSpec>,
}

/// One independent environment: namespace, database, proxy release, viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub name: String,
    pub namespace: String,
    #[serde(default = "default_service_account")]
    pub service_account: String,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Release name; the bank name when unset
    pub name: Option<String>,
    pub chart: String,
    pub version: Option<String>,
    /// Extra chart values merged over the generated overrides
    pub values: toml::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub manifest: PathBuf,
    pub deployment: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub name: String,
    pub source_dir: PathBuf,
    pub port: u16,
}

/// Bounds for the rollout and address waits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub rollout_timeout_secs: u64,
    pub address_attempts: u32,
    pub address_interval_secs: u64,
}

/// Minimum version and probe for one external binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub version: String, // Format: ">=1.0.0"
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
    #[serde(default)]
    pub install_hint: Option<String>,
}

fn default_service_account() -> String {
    "estap".to_string()
}

fn default_version_args() -> Vec<String> {
    vec!["--version".to_string()]
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            name: None,
            chart: "./charts/estap".to_string(),
            version: None,
            values: toml::Table::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("manifests/postgres.yaml"),
            deployment: "postgres".to_string(),
            port: 5432,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            name: "pg-viewer".to_string(),
            source_dir: PathBuf::from("."),
            port: 8080,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        // 36 x 5s covers the ~3 minutes a cloud load balancer usually needs
        Self {
            rollout_timeout_secs: 180,
            address_attempts: 36,
            address_interval_secs: 5,
        }
    }
}

impl PollSettings {
    pub fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.rollout_timeout_secs)
    }

    pub fn address_interval(&self) -> Duration {
        Duration::from_secs(self.address_interval_secs)
    }
}

impl BankConfig {
    /// Bank with every field at its conventional default
    pub fn named(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            service_account: default_service_account(),
            release: ReleaseConfig::default(),
            database: DatabaseConfig::default(),
            viewer: ViewerConfig::default(),
        }
    }

    pub fn release_name(&self) -> &str {
        self.release.name.as_deref().unwrap_or(&self.name)
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        let tool = |version: &str, args: &[&str], hint: &str| ToolSpec {
            version: version.to_string(),
            version_args: args.iter().map(|a| (*a).to_string()).collect(),
            install_hint: Some(hint.to_string()),
        };

        let mut tools = BTreeMap::new();
        tools.insert(
            "oc".to_string(),
            tool(">=4.10.0", &["version", "--client"], "https://mirror.openshift.com/pub/openshift-v4/clients/ocp/"),
        );
        tools.insert(
            "helm".to_string(),
            tool(">=3.8.0", &["version", "--short"], "https://helm.sh/docs/intro/install/"),
        );
        tools.insert(
            "aws".to_string(),
            tool(">=2.0.0", &["--version"], "https://aws.amazon.com/cli/"),
        );
        tools.insert(
            "pgbench".to_string(),
            tool(">=12.0.0", &["--version"], "install the postgresql client package"),
        );

        Self {
            banks: vec![
                BankConfig::named("bank-a", "estap-bank-a"),
                BankConfig::named("bank-b", "estap-bank-b"),
            ],
            polling: PollSettings::default(),
            tools,
        }
    }
}

impl DeployConfig {
    /// Load `path`, falling back to the built-in demo layout when it is absent
    pub fn load(path: &Path) -> Result<Self> {
        let expanded = expand_path(path);
        if !expanded.exists() {
            info!(path = %expanded.display(), "no config file, using built-in defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&expanded)
            .with_context(|| format!("Failed to read {}", expanded.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", expanded.display()))?;

        // Tools left out of the file keep their built-in requirement
        for (name, spec) in Self::default().tools {
            config.tools.entry(name).or_insert(spec);
        }
        for bank in &mut config.banks {
            bank.database.manifest = expand_path(&bank.database.manifest);
            bank.viewer.source_dir = expand_path(&bank.viewer.source_dir);
        }

        Ok(config)
    }

    /// Replace the bank list with a single bank in `namespace`, as selected
    /// by the positional `deploy` arguments.
    pub fn single_bank(&mut self, namespace: &str, source_dir: Option<PathBuf>) {
        let mut bank = self
            .banks
            .first()
            .cloned()
            .unwrap_or_else(|| BankConfig::named(namespace, namespace));
        bank.name = namespace.to_string();
        bank.namespace = namespace.to_string();
        if let Some(dir) = source_dir {
            bank.viewer.source_dir = expand_path(&dir);
        }
        self.banks = vec![bank];
    }
}

/// Expand a leading `~` in a path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}
