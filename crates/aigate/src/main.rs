use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use aigate::config::Config;
use aigate::upstream::UpstreamAuth;

#[derive(Parser)]
#[command(name = "aigate", version, about = "AI request gateway")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "aigate.yaml")]
    config: PathBuf,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    aigate::logging::init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!(config = %cli.config.display(), "Starting aigate");
    aigate::server::run(config, UpstreamAuth::from_env()).await
}
