//! Viewer configuration, resolved once at start-up
//!
//! Connection fields follow the libpq `PG*` contract the deploy pipeline
//! injects. Nothing is required: an unconfigured viewer still starts and
//! serves `/healthz`, and reports database errors on the other routes.

use clap::Parser;
use estap_core::PgSettings;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "estap-viewer", version = estap_core::VERSION, about = "estap table viewer")]
pub struct ViewerConfig {
    #[arg(long, env = "PGHOST")]
    pub pg_host: Option<String>,

    #[arg(long, env = "PGPORT")]
    pub pg_port: Option<u16>,

    #[arg(long, env = "PGUSER")]
    pub pg_user: Option<String>,

    #[arg(long, env = "PGDATABASE")]
    pub pg_database: Option<String>,

    #[arg(long, env = "PGPASSWORD", hide = true, hide_env_values = true)]
    pub pg_password: Option<SecretString>,

    /// Address to listen on
    #[arg(long, env = "VIEWER_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    #[arg(long, env = "VIEWER_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "VIEWER_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection before failing a request
    #[arg(long, env = "VIEWER_ACQUIRE_TIMEOUT", default_value_t = 5)]
    pub acquire_timeout_secs: u64,
}

impl ViewerConfig {
    /// Connection settings as shown on the dashboard
    pub fn pg_settings(&self) -> PgSettings {
        PgSettings {
            host: self.pg_host.clone(),
            port: self.pg_port,
            user: self.pg_user.clone(),
            database: self.pg_database.clone(),
            password: self.pg_password.clone(),
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        // No password file lookup; the secret comes from PGPASSWORD only
        let mut options = PgConnectOptions::new_without_pgpass();
        if let Some(host) = &self.pg_host {
            options = options.host(host);
        }
        if let Some(port) = self.pg_port {
            options = options.port(port);
        }
        if let Some(user) = &self.pg_user {
            options = options.username(user);
        }
        if let Some(database) = &self.pg_database {
            options = options.database(database);
        }
        if let Some(password) = &self.pg_password {
            options = options.password(password.expose_secret());
        }
        options
    }

    /// Pool that connects on first use, so the server starts before the
    /// database is reachable
    pub fn pool(&self) -> PgPool {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
            .connect_lazy_with(self.connect_options())
    }
}
