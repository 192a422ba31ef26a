//! sentinel: wearable sensor hub daemon
//!
//! Samples environment, gas, motion, battery and GNSS, follows a BLE
//! heart-rate strap and pushes every reading to a backend over WiFi or LTE.
//!
//! Features:
//! - host: host battery and network interfaces
//! - ble: btleplug central for the strap
//! - modem: AT modem over a serial port (LTE fallback + GNSS)
//! - linux: BlueZ GATT server emulating the strap

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// === Modules ===

mod backend;
mod bluetooth;
mod config;
mod data;
mod error;
mod network;
mod sensors;
mod shared;
mod tasks;

// === CLI ===

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Wearable sensor hub daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub (default)
    Run {
        /// Config file instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,
        /// Simulate every device that is not configured
        #[arg(long)]
        simulate: bool,
    },
    /// Edit the config file, creating it from the template first
    Config {
        /// Config file instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,
        /// Parse and validate instead of opening an editor
        #[arg(long)]
        check: bool,
    },
    /// Answer every HTTP request with 200 OK and log it
    EchoServer {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Advertise an emulated heart-rate strap over BlueZ
    #[cfg(all(feature = "linux", target_os = "linux"))]
    EmulateStrap {
        /// Adapter name, e.g. hci0
        #[arg(long)]
        adapter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { config, check }) => run_config_command(config, check)?,
        Some(Commands::Run { config, simulate }) => {
            init_logging();
            run_hub(config, simulate).await?;
        }
        Some(Commands::EchoServer { port }) => {
            init_logging();
            backend::echo::run(port, shutdown_on_ctrl_c()).await?;
        }
        #[cfg(all(feature = "linux", target_os = "linux"))]
        Some(Commands::EmulateStrap { adapter }) => {
            init_logging();
            bluetooth::gatt_server::run(adapter.as_deref(), shutdown_on_ctrl_c()).await?;
        }
        None => {
            init_logging();
            run_hub(None, false).await?;
        }
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Shutdown signal flipped by Ctrl-C
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = tx.send(true);
        // keep the sender alive so receivers do not see a closed channel
        std::future::pending::<()>().await;
    });
    rx
}

const CONFIG_TEMPLATE: &str = include_str!("../config.toml.example");

#[cfg(target_os = "windows")]
const FALLBACK_EDITOR: &str = "notepad";
#[cfg(not(target_os = "windows"))]
const FALLBACK_EDITOR: &str = "nano";

/// Write the template if the file is missing, then validate or edit it
fn run_config_command(path: Option<PathBuf>, check: bool) -> anyhow::Result<()> {
    let path = path
        .or_else(config::Config::path)
        .context("Could not determine config directory")?;

    if !path.exists() {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, CONFIG_TEMPLATE)?;
        println!("Wrote config template to {}", path.display());
    }

    if check {
        let contents = std::fs::read_to_string(&path)?;
        let config = config::Config::parse(&contents)
            .with_context(|| format!("{} is not valid TOML", path.display()))?;
        config.validate()?;
        println!("{} is valid (device {})", path.display(), config.device_id);
        return Ok(());
    }

    let editor = ["VISUAL", "EDITOR"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| FALLBACK_EDITOR.to_string());
    let status = std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to launch {}", editor))?;
    if !status.success() {
        anyhow::bail!("{} exited with {}", editor, status);
    }
    Ok(())
}

/// Run every hub task until Ctrl-C
async fn run_hub(path: Option<PathBuf>, simulate: bool) -> anyhow::Result<()> {
    let mut config = config::Config::load(path.as_deref());
    config.simulate |= simulate;
    config.validate()?;

    tracing::info!(
        "Starting sentinel {} as {}{}",
        env!("CARGO_PKG_VERSION"),
        config.device_id,
        if config.simulate { " (simulated devices)" } else { "" }
    );

    let devices = tasks::Devices::from_config(&config);
    let mut running = tasks::spawn_all(&config, devices, shutdown_on_ctrl_c()).await;

    while let Some(result) = running.join_next().await {
        if let Err(e) = result {
            tracing::error!("Task failed: {}", e);
        }
    }

    tracing::info!("sentinel stopped");
    Ok(())
}
