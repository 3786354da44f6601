//! C9: bootstrap binary (spec §4.9 ambient section): parses CLI args,
//! loads the config, builds the `Service`, and runs it until `ctrl_c` or a
//! bus `mycroft.stop`-style shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;

use neon_listener::config::{ConfigProvider, FileConfigProvider};
use neon_listener::pipeline::ProducerCommand;
use neon_listener::plugin_registry::{PluginRegistry, StaticPluginRegistry};
use neon_listener::service::Service;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Messagebus WebSocket URL (spec §6 transport).
    #[arg(short, long, env = "NEON_LISTENER_BUS_URL", default_value = "ws://0.0.0.0:8181/core")]
    bus_url: String,

    /// Override the default XDG config path (spec §1: one concrete provider,
    /// not a full search-path resolver).
    #[arg(short, long, env = "NEON_LISTENER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();

    let provider: Arc<dyn ConfigProvider> = match args.config {
        Some(path) => Arc::new(FileConfigProvider::new(path)),
        None => Arc::new(FileConfigProvider::default_location()?),
    };
    let config = provider.load()?;

    let registry: Arc<dyn PluginRegistry> = Arc::new(StaticPluginRegistry::default());

    let mut service = Service::bootstrap(config, provider, registry, &args.bus_url).await?;
    tracing::info!(bus_url = %args.bus_url, "neon-listener started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = service.facade.producer_commands.send(ProducerCommand::Shutdown);
    service.join_producer();

    Ok(())
}
