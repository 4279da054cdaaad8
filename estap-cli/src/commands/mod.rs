//! `estap` subcommands

pub mod bench;
pub mod check;
pub mod deploy;
pub mod endpoint;
pub mod ports;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "estap", version = estap_core::VERSION, about = "estap demo environment tooling")]
pub struct Cli {
    /// Deploy configuration; built-in two-bank layout when the file is absent
    #[arg(long, global = true, env = "ESTAP_CONFIG", default_value = "estap.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Provision database, proxy release and viewer for each bank
    Deploy(deploy::DeployArgs),

    /// Re-check a proxy's external address, optionally finishing the viewer wiring
    Endpoint(endpoint::EndpointArgs),

    /// Run pgbench against a proxy
    Bench(bench::BenchArgs),

    /// Open the proxy and database ports on AWS security groups
    OpenPorts(ports::OpenPortsArgs),

    /// Check tools, platform login and local files
    Check,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Deploy(args) => deploy::handle(&cli.config, args).await,
        Commands::Endpoint(args) => endpoint::handle(&cli.config, args).await,
        Commands::Bench(args) => bench::handle(&cli.config, args).await,
        Commands::OpenPorts(args) => ports::handle(&cli.config, args).await,
        Commands::Check => check::handle(&cli.config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_deploy_positionals() {
        let cli = Cli::try_parse_from(["estap", "deploy", "demo-ns", "./viewer", "--parallel"]).unwrap();
        match cli.command {
            Commands::Deploy(args) => {
                assert_eq!(args.namespace.as_deref(), Some("demo-ns"));
                assert_eq!(args.source_dir, Some(PathBuf::from("./viewer")));
                assert!(args.parallel);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
