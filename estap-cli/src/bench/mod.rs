//! pgbench driver
//!
//! Resolves a connection to the estap proxy and runs `pgbench` against it.
//! Sources, strongest first:
//! 1. `--dsn`, which overrides everything and never prompts or scrapes
//! 2. the `PG*` environment
//! 3. the viewer dashboard, scraped; user and database scraped this way are
//!    only offered as prompt defaults
//!
//! The secret comes from the DSN, `PGPASSWORD` or the password file and only
//! ever reaches `pgbench` through its environment.

pub mod pgpass;
pub mod prompt;
pub mod scrape;

use estap_core::{
    DsnError, ESTAP_PORT, PGDATABASE, PGHOST, PGPASSWORD, PGPORT, PGUSER, PgSettings,
};
use secrecy::{ExposeSecret, SecretString};
use snafu::{ResultExt, Snafu};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::pipeline::Progress;
pub use prompt::Prompter;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BenchError {
    #[snafu(display("--dsn: {source}"))]
    Dsn { source: DsnError },

    #[snafu(display("PG* environment: {source}"))]
    Environment { source: DsnError },

    #[snafu(display("Could not fetch {url}: {source}"))]
    Fetch { url: String, source: reqwest::Error },

    #[snafu(display("Prompt failed: {source}"))]
    Prompt { source: dialoguer::Error },

    #[snafu(display(
        "connection {} unresolved (set PG* variables, pass --dsn or --viewer-url)",
        missing.join(", ")
    ))]
    Unresolved { missing: Vec<String> },

    #[snafu(display("Failed to execute pgbench: {source}"))]
    Spawn { source: std::io::Error },

    #[snafu(display("pgbench task failed: {source}"))]
    Join { source: tokio::task::JoinError },

    #[snafu(display("pgbench {step} exited with {}", code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))))]
    Pgbench { step: String, code: Option<i32> },
}

/// Options of `estap bench`
#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub dsn: Option<String>,
    pub viewer_url: Option<String>,
    pub duration_secs: u32,
    pub clients: u32,
    pub threads: u32,
    pub init: bool,
    pub scale: u32,
    pub select_only: bool,
    pub pgbench: String,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            dsn: None,
            viewer_url: None,
            duration_secs: 60,
            clients: 10,
            threads: 2,
            init: false,
            scale: 1,
            select_only: false,
            pgbench: "pgbench".to_string(),
        }
    }
}

/// Every source collected before resolution
#[derive(Debug, Default)]
pub struct Sources {
    pub dsn: Option<PgSettings>,
    pub env: PgSettings,
    pub scraped: PgSettings,
}

impl Sources {
    /// Whether anything is left for the viewer page to fill in
    pub fn needs_scrape(&self) -> bool {
        self.dsn.is_none() && !self.env.missing().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    Dsn,
    Environment,
    PasswordFile(PathBuf),
    None,
}

/// A fully resolved connection. `Display` and `Debug` never show the secret.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub secret: Option<SecretString>,
    pub secret_source: SecretSource,
    /// Came from `--dsn`; the child must not see the caller's libpq variables
    pub from_dsn: bool,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// Parse the DSN and environment, then scrape the viewer only if needed
pub async fn gather(
    options: &BenchOptions,
    env: impl Fn(&str) -> Option<String>,
    progress: &Progress,
) -> Result<Sources, BenchError> {
    let dsn = options
        .dsn
        .as_deref()
        .map(PgSettings::from_dsn)
        .transpose()
        .context(DsnSnafu)?;
    if dsn.is_some() {
        debug!("--dsn given, skipping environment and viewer page");
        return Ok(Sources {
            dsn,
            ..Sources::default()
        });
    }

    let mut sources = Sources {
        dsn: None,
        env: PgSettings::from_lookup(&env).context(EnvironmentSnafu)?,
        scraped: PgSettings::default(),
    };

    if sources.needs_scrape()
        && let Some(url) = options.viewer_url.as_deref()
    {
        progress.step(format!("Reading connection details from {url}"));
        match scrape::fetch(url).await {
            Ok(scraped) => {
                progress.done(format!("viewer reports {scraped}"));
                sources.scraped = scraped;
            }
            Err(e) => progress.warn(format!("{e}")),
        }
    }

    Ok(sources)
}

/// Combine the sources into one target, prompting for user and database
/// when the environment lacks them
pub fn resolve(
    sources: Sources,
    prompter: &dyn Prompter,
    password_file: Option<PathBuf>,
    progress: &Progress,
) -> Result<Target, BenchError> {
    let Sources { dsn, env, scraped } = sources;

    let from_dsn = dsn.is_some();
    let (settings, secret_source) = match dsn {
        Some(dsn) => {
            let source = if dsn.password.is_some() {
                SecretSource::Dsn
            } else {
                SecretSource::None
            };
            // Defaults for a DSN that leaves the port out
            let fallback = PgSettings {
                port: Some(ESTAP_PORT),
                ..PgSettings::default()
            };
            (dsn.or(fallback), source)
        }
        None => {
            let user = match env.user.clone() {
                Some(user) => Some(user),
                None => prompter.ask("User", scraped.user.as_deref())?,
            };
            let database = match env.database.clone() {
                Some(database) => Some(database),
                None => prompter.ask("Database", scraped.database.as_deref())?,
            };
            let source = if env.password.is_some() {
                SecretSource::Environment
            } else {
                SecretSource::None
            };
            let prompted = PgSettings {
                user,
                database,
                ..PgSettings::default()
            };
            let scraped = PgSettings {
                user: None,
                database: None,
                ..scraped
            };
            (env.or(prompted).or(scraped), source)
        }
    };

    let missing = settings.missing();
    let (Some(host), Some(port), Some(user), Some(database)) =
        (settings.host, settings.port, settings.user, settings.database)
    else {
        return UnresolvedSnafu {
            missing: missing.into_iter().map(str::to_string).collect::<Vec<_>>(),
        }
        .fail();
    };

    let mut target = Target {
        host,
        port,
        user,
        database,
        secret: settings.password,
        secret_source,
        from_dsn,
    };

    if target.secret.is_none()
        && let Some(path) = password_file
        && let Some(secret) =
            pgpass::lookup(&path, &target.host, target.port, &target.database, &target.user)
    {
        target.secret = Some(secret);
        target.secret_source = SecretSource::PasswordFile(path);
    }

    match &target.secret_source {
        SecretSource::None => progress.warn(format!(
            "no password found for {target} (pgbench may prompt for one)"
        )),
        SecretSource::PasswordFile(path) => {
            info!(path = %path.display(), "using password file entry");
        }
        SecretSource::Dsn | SecretSource::Environment => {}
    }

    Ok(target)
}

/// libpq variables that would otherwise leak into a `--dsn` run
const LIBPQ_ENVIRONMENT: [&str; 11] = [
    PGHOST,
    "PGHOSTADDR",
    PGPORT,
    PGUSER,
    PGPASSWORD,
    PGDATABASE,
    "PGSERVICE",
    "PGSSLMODE",
    "PGOPTIONS",
    "PGAPPNAME",
    "PGCONNECT_TIMEOUT",
];

/// One or two `pgbench` invocations for a target
#[derive(Debug)]
pub struct BenchPlan {
    pub program: String,
    pub init: Option<Vec<String>>,
    pub run: Vec<String>,
    secret: Option<SecretString>,
    scrub_environment: bool,
}

fn connection_args(target: &Target) -> Vec<String> {
    vec![
        "-h".to_string(),
        target.host.clone(),
        "-p".to_string(),
        target.port.to_string(),
        "-U".to_string(),
        target.user.clone(),
    ]
}

impl BenchPlan {
    pub fn new(target: &Target, options: &BenchOptions) -> Self {
        let init = options.init.then(|| {
            let mut args = connection_args(target);
            args.extend(["-i".to_string(), "-s".to_string(), options.scale.to_string()]);
            args.push(target.database.clone());
            args
        });

        let mut run = connection_args(target);
        run.extend([
            "-c".to_string(),
            options.clients.to_string(),
            "-j".to_string(),
            options.threads.to_string(),
            "-T".to_string(),
            options.duration_secs.to_string(),
        ]);
        if options.select_only {
            run.push("-S".to_string());
        }
        run.push(target.database.clone());

        Self {
            program: options.pgbench.clone(),
            init,
            run,
            secret: target.secret.clone(),
            scrub_environment: target.from_dsn,
        }
    }

    /// Shell-style rendering with the secret masked
    pub fn command_lines(&self) -> Vec<String> {
        let prefix = if self.secret.is_some() {
            format!("{PGPASSWORD}=***** ")
        } else {
            String::new()
        };
        self.init
            .iter()
            .chain(std::iter::once(&self.run))
            .map(|args| format!("{prefix}{} {}", self.program, args.join(" ")))
            .collect()
    }

    async fn invoke(&self, step: &str, args: Vec<String>) -> Result<(), BenchError> {
        let mut command = duct::cmd(&self.program, args).unchecked();
        if self.scrub_environment {
            for var in LIBPQ_ENVIRONMENT {
                // An explicit secret replaces PGPASSWORD below
                if var == PGPASSWORD && self.secret.is_some() {
                    continue;
                }
                command = command.env_remove(var);
            }
        }
        if let Some(secret) = &self.secret {
            command = command.env(PGPASSWORD, secret.expose_secret());
        }

        let output = tokio::task::spawn_blocking(move || command.run())
            .await
            .context(JoinSnafu)?
            .context(SpawnSnafu)?;

        if output.status.success() {
            Ok(())
        } else {
            PgbenchSnafu {
                step,
                code: output.status.code(),
            }
            .fail()
        }
    }

    /// Run initialisation (if planned) and then the benchmark
    pub async fn execute(&self, progress: &Progress) -> Result<(), BenchError> {
        if let Some(init) = &self.init {
            progress.step("Initialising pgbench tables");
            self.invoke("initialisation", init.clone()).await?;
            progress.done("tables initialised");
        }

        progress.step("Running pgbench");
        self.invoke("run", self.run.clone()).await?;
        progress.done("benchmark finished");
        Ok(())
    }
}
