//! Subwatch - realtime monitoring of Substrate chains over HTTP and WebSocket.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use subwatch_chain::SubxtConnector;
use subwatch_core::ChainEndpointRequest;
use subwatch_core::config::{load_config, load_config_from, save_config, save_config_to};
use subwatch_server::{AppState, ChainRegistry, ViewerHub, router};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Subwatch - monitor several Substrate chains at once.
#[derive(Parser, Debug)]
#[command(name = "subwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to serve HTTP and viewer sockets on, e.g. 127.0.0.1:5000
    #[arg(short, long)]
    bind: Option<String>,

    /// Chain WebSocket endpoint to connect at startup. May be repeated.
    #[arg(long = "connect", value_name = "WS_URL")]
    connect: Vec<String>,

    /// Allowed CORS origin (any origin when unset)
    #[arg(long = "cors-origin")]
    cors_origin: Option<String>,

    /// Write the effective configuration back to the config file.
    #[arg(long)]
    save_config: bool,

    /// Log as JSON lines instead of human readable text.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("subwatch=info".parse()?)
        .add_directive("subwatch_server=info".parse()?)
        .add_directive("subwatch_chain=info".parse()?)
        .add_directive("subwatch_core=info".parse()?)
        .add_directive("tower_http=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = match &args.config {
        Some(path) => load_config_from(path)
            .wrap_err_with(|| format!("Failed to load config from {}", path.display()))?,
        None => load_config().wrap_err("Failed to load config")?,
    };

    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if args.cors_origin.is_some() {
        config.cors_origin = args.cors_origin;
    }
    for url in args.connect {
        config.add_bootstrap(ChainEndpointRequest::new(url));
    }

    if args.save_config {
        match &args.config {
            Some(path) => save_config_to(path, &config)?,
            None => save_config(&config)?,
        }
        tracing::info!("Configuration saved");
    }

    let monitor = config.monitor.to_monitor_config();
    tracing::info!(
        "Stats every {:?}, broadcast every {:?}, window of {} blocks",
        monitor.stats_interval,
        monitor.broadcast_interval,
        monitor.window_size
    );

    let registry = Arc::new(ChainRegistry::new(Arc::new(SubxtConnector), monitor));
    let hub = Arc::new(ViewerHub::new(registry.clone()));

    let shutdown = CancellationToken::new();
    let broadcaster = hub.clone().spawn(shutdown.clone());

    // Startup chains are best effort; a bad endpoint is not fatal
    for request in config.bootstrap.clone() {
        let url = request.ws_url.clone();
        if let Err(e) = registry.connect(request).await {
            tracing::error!("Failed to connect to {} at startup: {}", url, e);
        }
    }

    let app = router(
        AppState::new(registry.clone(), hub.clone()),
        config.cors_origin.as_deref(),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    shutdown.cancel();
    if let Err(e) = broadcaster.await {
        tracing::warn!("Broadcaster did not stop cleanly: {}", e);
    }
    registry.disconnect_all().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
