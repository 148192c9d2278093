//! `sls-simulator` — protocol-compatible detector simulator.
//!
//! Stands in for an SLS strip detector (Mythen family) on the usual
//! control/stop port pair so clients can be exercised without hardware.
//!
//! # Usage
//!
//! ```bash
//! sls-simulator                      # defaults: 127.0.0.1:1952 / 1953
//! sls-simulator --config sim.toml    # settings from TOML
//! sls-simulator --ctrl-port 3100 --stop-port 3101 --seed 7
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use sls_detector::simulator::Simulator;
use sls_detector::SimulatorSettings;

#[derive(Parser)]
#[command(name = "sls-simulator")]
#[command(about = "Protocol-compatible SLS strip detector simulator", long_about = None)]
struct Cli {
    /// Optional TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind both listeners on
    #[arg(long)]
    host: Option<String>,

    /// Control port override
    #[arg(long)]
    ctrl_port: Option<u16>,

    /// Stop port override
    #[arg(long)]
    stop_port: Option<u16>,

    /// Seed for synthetic frame generation
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => SimulatorSettings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => SimulatorSettings::default(),
    };
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.ctrl_port {
        settings.ctrl_port = port;
    }
    if let Some(port) = cli.stop_port {
        settings.stop_port = port;
    }
    if let Some(seed) = cli.seed {
        settings.seed = seed;
    }

    env_logger::Builder::new()
        .parse_filters(&settings.log_level)
        .init();

    let simulator = Simulator::bind(&settings)
        .await
        .context("binding simulator listeners")?;
    simulator.run().await.context("running simulator")?;
    Ok(())
}
