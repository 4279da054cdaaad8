//! `estap bench`

use anyhow::Result;
use clap::Args;
use std::path::Path;

use crate::bench::{self as driver, BenchOptions, BenchPlan, pgpass, prompt};
use crate::config::DeployConfig;
use crate::pipeline::Progress;
use crate::preflight::{self, Requirements};

#[derive(Debug, Args, Clone)]
pub struct BenchArgs {
    /// Full connection string; overrides the environment and the viewer page
    #[arg(long, env = "ESTAP_DSN", hide_env_values = true)]
    pub dsn: Option<String>,

    /// Viewer dashboard to read connection details from
    #[arg(long, env = "ESTAP_VIEWER_URL")]
    pub viewer_url: Option<String>,

    /// Benchmark duration in seconds
    #[arg(short = 'T', long, default_value_t = 60)]
    pub duration: u32,

    /// Concurrent clients
    #[arg(short, long, default_value_t = 10)]
    pub clients: u32,

    /// Worker threads
    #[arg(short = 'j', long, default_value_t = 2)]
    pub threads: u32,

    /// Create the pgbench tables first
    #[arg(long)]
    pub init: bool,

    /// Scale factor for --init
    #[arg(long, default_value_t = 1, requires = "init")]
    pub scale: u32,

    /// Read-only (SELECT) workload
    #[arg(short = 'S', long)]
    pub select_only: bool,

    /// Print the resolved target and command line, run nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Accept scraped defaults instead of prompting
    #[arg(short, long)]
    pub yes: bool,
}

impl From<&BenchArgs> for BenchOptions {
    fn from(args: &BenchArgs) -> Self {
        Self {
            dsn: args.dsn.clone(),
            viewer_url: args.viewer_url.clone(),
            duration_secs: args.duration,
            clients: args.clients,
            threads: args.threads,
            init: args.init,
            scale: args.scale,
            select_only: args.select_only,
            ..BenchOptions::default()
        }
    }
}

pub async fn handle(config_path: &Path, args: BenchArgs) -> Result<()> {
    let options = BenchOptions::from(&args);

    if !args.dry_run {
        let config = DeployConfig::load(config_path)?;
        let checks = preflight::check(
            &Requirements {
                tools: vec![options.pgbench.as_str()],
                ..Requirements::default()
            },
            &config.tools,
        );
        checks.ensure()?;
    }

    let progress = Progress::plain();
    let env = |key: &str| std::env::var(key).ok();
    let sources = driver::gather(&options, env, &progress).await?;
    let prompter = prompt::for_session(args.yes);
    let target = driver::resolve(
        sources,
        prompter.as_ref(),
        pgpass::default_path(env),
        &progress,
    )?;

    println!("🎯 Target: {target}");
    let plan = BenchPlan::new(&target, &options);
    if args.dry_run {
        for line in plan.command_lines() {
            println!("{line}");
        }
        return Ok(());
    }

    plan.execute(&progress).await?;
    Ok(())
}
