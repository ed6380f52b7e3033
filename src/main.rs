use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voicerag_gateway::{RelayServer, ServerConfig, config::parse_bool};

/// VoiceRAG Gateway - realtime voice relay with knowledge-base tools
#[derive(Parser, Debug)]
#[command(name = "voicerag-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Deployed environments inject real variables; skip .env there
    let in_production = std::env::var("RUNNING_IN_PRODUCTION")
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(false);
    if !in_production {
        let _ = dotenvy::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must run before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    info!(
        provider = %config.realtime_provider,
        deployment = %config.realtime_deployment,
        search = config.search_index_config().is_some(),
        email = config.email_endpoint.is_some(),
        "Starting server on {}",
        config.address()
    );

    RelayServer::new(config)?.serve(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
