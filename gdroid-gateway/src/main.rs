//! gdroid gateway entry point.
//!
//! ```text
//! gdroid-gateway                  Run in the foreground
//! gdroid-gateway --config <path>  Load a custom config TOML
//! gdroid-gateway --gen-config     Write default config to stdout
//! gdroid-gateway --write-config   Write default config to the --config path
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gdroid_gateway::config::GatewayConfig;
use gdroid_gateway::service::Gateway;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gdroid-gateway", about = "gdroid device-control gateway")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gdroid-gateway.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    write_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", GatewayConfig::default_toml()?);
        return Ok(());
    }

    if cli.write_config {
        GatewayConfig::write_default(&cli.config)?;
        println!("wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    // Load errors are reported once the subscriber is up.
    let (config, load_error) = match GatewayConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (GatewayConfig::default(), Some(e)),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gdroid-gateway v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        warn!("invalid config {}: {e}; using defaults", cli.config.display());
    } else if !cli.config.exists() {
        info!("no config at {}; using defaults", cli.config.display());
    }
    info!("rpc: {}", config.rpc_addr());
    if config.screen.enabled {
        info!("push: {} ({} fps, source {})", config.push_addr(), config.screen.fps, config.screen.source);
    }

    let gateway = Gateway::new(config);
    let stop = gateway.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    gateway.run().await?;
    Ok(())
}
