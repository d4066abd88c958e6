// src/main.rs - wifibox-host entry point
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use wifibox_host::{PrinterSession, SessionEvent, config};

#[derive(Parser)]
#[command(name = "wifibox-host", about = "Stream g-code print jobs to a WiFi printer box")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(default_value = "wifibox.toml")]
    config: String,

    /// Override the box host from the configuration
    #[arg(long)]
    host: Option<String>,

    /// G-code file to print after connecting
    #[arg(long)]
    print: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    tracing::info!("Starting wifibox-host {}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        e
    })?;
    if let Some(host) = args.host {
        config.device.host = host;
    }
    tracing::info!("Printer box: {}", config.device.host);

    let session = PrinterSession::from_config(config)?;
    let mut events = session.events();
    session.connect().await;

    if let Some(path) = args.print {
        let instructions = tokio::fs::read_to_string(&path).await.map_err(|e| {
            tracing::error!("Failed to read g-code file '{}': {}", path, e);
            e
        })?;
        session.start_print(&instructions).await;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::ConnectionChanged { connected }) => {
                    tracing::info!("Connection state changed: connected={}", connected);
                }
                Ok(SessionEvent::StatusUpdated { phase, progress, printing, hotend, hotend_target, bed, bed_target }) => {
                    tracing::debug!(
                        "{} {:.1}% printing={} hotend={:.1}/{:.1} bed={:.1}/{:.1}",
                        phase, progress, printing, hotend, hotend_target, bed, bed_target
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Dropped {} session events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.close().await;
    Ok(())
}
