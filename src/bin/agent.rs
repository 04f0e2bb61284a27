use clap::Parser;
use std::env;
use std::path::PathBuf;
use tracing::info;

use promptstack_core::config::ServiceConfig;

/// PromptStack filesystem agent: structure walks, batch reads, watches.
#[derive(Parser, Debug)]
#[command(name = "promptstack-agent", version)]
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

    if let Some(port) = env::var("PROMPTSTACK_AGENT_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
    {
        config.agent.port = port;
    }
    if let Some(port) = args.port {
        config.agent.port = port;
    }

    info!("Starting PromptStack agent on port {}", config.agent.port);

    promptstack_core::agent::run_agent(config.agent)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
