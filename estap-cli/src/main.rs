use clap::Parser;
use estap_cli::{Cli, commands};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();

    let cli = Cli::parse();
    if let Err(e) = commands::run(cli).await {
        eprintln!("ERROR: {e:#}");
        std::process::exit(1);
    }
}
