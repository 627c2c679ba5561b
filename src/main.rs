use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, info, warn};

use hn_best_stories::logging::{init_logging, parse_log_level, LoggingConfig};
use hn_best_stories::{build_state, create_router, AppConfig, HackerNewsClient};

/// Serves the top Hacker News best stories, ordered by score.
#[derive(Parser, Debug)]
#[command(name = "hn_best_stories")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::from_env()?,
    };

    init_logging(LoggingConfig {
        json_format: config.logging.json,
        default_level: parse_log_level(&config.logging.level),
    });
    info!(version = env!("CARGO_PKG_VERSION"), "starting hn_best_stories");

    let client = HackerNewsClient::new(&config.client_config())?;
    let state = build_state(&config, Arc::new(client));

    if config.cache.warm_on_start {
        match state.service.warm_up().await {
            Ok(stories) => info!(stories, "best stories cache warmed"),
            Err(err) => warn!(error = %err, "cache warm-up failed, continuing cold"),
        }
    }

    let purge_every = Duration::from_secs(config.admission.purge_interval_secs);
    let admission = Arc::clone(&state.admission);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = admission.purge_idle();
            if purged > 0 {
                debug!(purged, remaining = admission.tracked_clients(), "purged idle clients");
            }
        }
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host / server.port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    let router = create_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
