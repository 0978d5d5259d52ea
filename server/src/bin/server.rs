//! Seatlock HTTP server.
//!
//! Serves the hold API and change feed, exposes Prometheus metrics on a
//! separate listener and sweeps lapsed holds in the background.

use anyhow::Context;
use axum::{Router, routing::get};
use seatlock_core::environment::SystemClock;
use seatlock_core::types::ShowtimeId;
use seatlock_runtime::metrics::MetricsServer;
use seatlock_server::{
    AppState, ChangeFeed, Config, ExpirySweeper, LockManager, build_router, layout,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Seatlock server");
    info!(
        bind = %config.bind_address(),
        hold_ttl_secs = config.locks.hold_ttl_secs,
        max_seats_per_request = config.locks.max_seats_per_request,
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr = config
        .metrics_address()
        .parse()
        .context("invalid metrics address")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start().context("failed to install metrics recorder")?;
    if let Some(handle) = metrics.handle().cloned() {
        let metrics_app = Router::new().route("/metrics", get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }));
        let listener = tokio::net::TcpListener::bind(metrics_addr).await?;
        info!(address = %metrics_addr, "Metrics endpoint listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics_app).await {
                warn!(error = %e, "Metrics endpoint stopped");
            }
        });
    }

    let feed = Arc::new(ChangeFeed::new(config.locks.feed_capacity));
    let manager = Arc::new(LockManager::new(
        config.locks.lock_config(),
        Arc::new(SystemClock),
        feed,
    ));

    if let Some(id) = config.seed_demo_showtime {
        let showtime_id = ShowtimeId::from_uuid(id);
        let seats = manager.schedule_showtime(showtime_id, layout::demo_theater())?;
        info!(showtime = %showtime_id, seats, "Demo showtime scheduled");
    }

    let sweeper = ExpirySweeper::spawn(Arc::clone(&manager), config.locks.sweep_interval());

    let app = build_router(AppState::new(manager, config.websocket.clone()));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout), sweeper.stop())
        .await
        .is_err()
    {
        warn!("Expiry sweeper did not stop in time");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
