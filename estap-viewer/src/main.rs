use clap::Parser;
use estap_viewer::ViewerConfig;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ViewerConfig::parse();
    if let Err(e) = estap_viewer::serve(config).await {
        eprintln!("ERROR: {e:#}");
        std::process::exit(1);
    }
}
