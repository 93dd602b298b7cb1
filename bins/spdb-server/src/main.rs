mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use spdb_net::FrameServer;
use spdb_service::SpdbService;
use spdb_store::MemBackend;

use crate::config::ServerConfig;

/// Spdb server: hosts chunk stores for remote clients.
#[derive(Parser, Debug)]
#[command(name = "spdb-server", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => { res?; tracing::info!("Received CTRL+C"); }
            _ = sigterm.recv() => { tracing::info!("Received SIGTERM"); }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received CTRL+C");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", toml::to_string_pretty(&ServerConfig::default())?);
        return Ok(());
    }

    let mut cfg = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        cfg.port = port;
    }

    let _guard = spdb_logging::init_logging(&cfg.log)?;

    let service = SpdbService::new(Arc::new(MemBackend::new()));
    let mut server = FrameServer::new(Arc::new(service))
        .with_idle_timeout(cfg.idle_timeout())
        .with_max_message_size(cfg.max_message_bytes);
    let addr = server.start((cfg.listen_host.as_str(), cfg.port)).await?;
    tracing::info!(%addr, max_message_bytes = cfg.max_message_bytes, "Spdb server listening");

    wait_for_shutdown_signal().await?;
    tracing::info!("Spdb server shutting down");
    server.stop();

    Ok(())
}
