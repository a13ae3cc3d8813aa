use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use estima_server::{config::session_policy, DiskFileStore, EventRouter, ServerConfig};
use estima_session::SessionRegistry;
use estima_telemetry::{init_telemetry, TelemetryConfig};

/// Real-time planning poker server.
#[derive(Debug, Parser)]
#[command(name = "estima", version, about)]
struct Cli {
    /// Settings file (defaults to ~/.estima/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = estima_settings::load_settings(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if cli.log_json {
        settings.logging.json = true;
    }

    init_telemetry(&TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json))
        .context("failed to initialise logging")?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting estima");

    let policy = session_policy(&settings.policy).context("invalid session policy")?;
    let config = ServerConfig::from_settings(&settings);
    let router = Arc::new(EventRouter::new(SessionRegistry::new(policy)));
    let store = Arc::new(DiskFileStore::new(
        &config.upload_dir,
        config.allowed_avatar_types.clone(),
        config.max_avatar_bytes,
    ));

    let addr = config.bind_addr();
    let handle = estima_server::start(config, router, store)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(port = handle.port, "estima ready");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    handle.shutdown().await;
    Ok(())
}
