//! Tidebot — headless autonomous spot trading engine.
//!
//! # Usage
//! ```sh
//! tidebot --config ./config
//! ```
//!
//! The config directory holds the two documents: `engine.toml` (general)
//! and `risk.toml` (risk limits). Exchange credentials come from the
//! environment (`EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET`).

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tidebot::application::engine::Engine;
use tidebot::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "tidebot", about = "Autonomous spot trading engine")]
struct Args {
    /// Directory containing engine.toml and risk.toml
    #[arg(long, default_value = "./config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let args = Args::parse();
    info!("Tidebot {} starting...", env!("CARGO_PKG_VERSION"));

    // Config problems are fatal before any I/O: one line, non-zero exit.
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {:#}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration loaded: mode={:?}, symbols={:?}, tz={}",
        config.mode, config.symbols, config.timezone
    );

    let engine = Engine::build(config).await?;
    info!("Engine built. Press Ctrl+C to shut down.");
    engine.run().await
}
