//! Gateway service entry point.
//!
//! HTTP/WebSocket gateway in front of one trading-platform session.

use anyhow::{Context, Result};
use clap::Parser;
use gateway::{create_router, GatewayConfig, GatewayContext};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use upstream::{SimConfig, SimulatedSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::parse();

    info!("Starting Gateway service");
    info!("Configuration:");
    info!("  IB: {}:{} (client id {})", config.ib_host, config.ib_port, config.client_id);
    info!("  PROXY: {}:{}", config.proxy_host, config.proxy_port);
    info!("  BAR_GRANULARITY_SECS: {}", config.bar_granularity_secs);

    // Start Prometheus metrics server
    if let Some(metrics_port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics_port))
            .install()
            .context("Failed to start Prometheus exporter")?;
        info!("Prometheus metrics server started on port {}", metrics_port);
    }

    let session = SimulatedSession::new(SimConfig {
        host: config.ib_host.clone(),
        port: config.ib_port,
        client_id: config.client_id,
        tick_interval: config.sim_tick_interval(),
        ..SimConfig::default()
    });

    let addr = config.listen_addr().context("Invalid PROXY_HOST/PROXY_PORT")?;
    let ctx = Arc::new(GatewayContext::new(config, Arc::new(session)));
    ctx.start().await;

    let app = create_router(ctx.clone());

    // Start HTTP server
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    ctx.shutdown().await;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
