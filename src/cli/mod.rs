//! Command-line interface.

use crate::core::config::Config;
use crate::core::logbuf::{self, LogBuffer};
use crate::core::runtime::Runtime;
use crate::net::client::Intercom;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "thermod", version, about = "Lab temperature-control daemon")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller daemon.
    Start {
        /// Path to the TOML configuration file.
        #[arg(short, long, default_value = "thermod.toml", env = "THERMOD_CONFIG")]
        config: PathBuf,
    },
    /// Ask a running daemon to shut down.
    Stop {
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
        #[arg(long, default_value_t = 22001)]
        port: u16,
    },
    /// Fetch settings keys from a running daemon and print them as JSON.
    Get {
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
        #[arg(long, default_value_t = 22001)]
        port: u16,
        /// Keys to fetch, e.g. `pid0/setpoint` or `data`.
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Start { config } => run_start(config).await,
            Commands::Stop { host, port } => run_stop(SocketAddr::new(host, port)).await,
            Commands::Get { host, port, keys } => {
                run_get(SocketAddr::new(host, port), keys).await
            }
        }
    }
}

async fn run_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_file(&config_path)?;
    let logs = Arc::new(LogBuffer::new(config.telemetry.log_buffer));
    let log_handle = logbuf::init(&config.telemetry.log_level, logs.clone())
        .context("cannot initialize logging")?;

    let mut runtime = Runtime::new(config, logs, log_handle)?;
    runtime.start().await?;
    runtime.run().await
}

async fn run_stop(addr: SocketAddr) -> anyhow::Result<()> {
    let intercom = Intercom::new(addr);
    intercom.off().await?;
    // The OFF handler raises the flag after replying; a throwaway frame
    // pops the listener out of accept so it notices immediately.
    tokio::time::sleep(Duration::from_millis(100)).await;
    intercom.poke().await;
    println!("stop requested");
    Ok(())
}

async fn run_get(addr: SocketAddr, keys: Vec<String>) -> anyhow::Result<()> {
    let intercom = Intercom::new(addr);
    let values = intercom.get(&keys).await?;
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}
