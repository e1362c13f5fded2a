use std::path::PathBuf;

use clap::Parser;

use h2_relay::config::{load_config, RelayConfig};

#[derive(Parser)]
#[command(name = "h2-relay")]
#[command(about = "Serve a static site or relay requests to HTTP/2 upstreams", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for authority changes
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    h2_relay::lifecycle::run(config, cli.config.as_deref()).await?;
    Ok(())
}
