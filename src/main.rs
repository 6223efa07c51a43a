use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pokewatch_gate::auth::ApiKeyAuth;
use pokewatch_gate::config::GateConfig;
use pokewatch_gate::http::{AppState, HttpServer};
use pokewatch_gate::ratelimit::build_backend;

/// Rate-limited admission gate for the PokeWatch price API.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// YAML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides HTTP_ADDR and the file
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Starting PokeWatch Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GateConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    info!(
        addr = %config.server.addr,
        backend = ?config.rate_limiting.backend,
        "Configuration loaded"
    );

    let limiter = build_backend(&config.rate_limiting).await?;
    let auth = ApiKeyAuth::from_config(&config.auth)?;
    info!(
        required = auth.is_required(),
        admin_routes = auth.has_admin_keys(),
        "API key authentication initialized"
    );

    let state = AppState::new(limiter, auth, config.rate_limiting.on_store_error);
    let server = HttpServer::new(config.server.addr, state);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("PokeWatch Gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
