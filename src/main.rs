use clap::Parser;
use std::env;
use std::path::PathBuf;
use tracing::info;

use promptstack_core::config::ServiceConfig;

/// PromptStack main server: real-time fan-out and agent orchestration.
#[derive(Parser, Debug)]
#[command(name = "promptstack-core", version)]
struct Args {
    /// Path to promptstack.toml (defaults to ./promptstack.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    promptstack_core::util::init_logging();

    let args = Args::parse();
    let mut config = ServiceConfig::load(args.config.as_deref())?;

    // Env var takes effect unless a CLI flag overrides it.
    if let Some(port) = env::var("PROMPTSTACK_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
    {
        config.server.port = port;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Starting PromptStack server on port {}", config.server.port);

    promptstack_core::server::run_server(config.server)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
