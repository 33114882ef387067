use anyhow::Context;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_reservation::{app, clock::SystemClock, config::Config, AppState};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load().context("Failed to load configuration")?;

    let (json, plain) = if config.app.log_json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(json)
        .with(plain)
        .init();

    info!(
        "Starting seat reservation service ({} environment)",
        config.app.environment
    );

    let state = AppState::new(config.clone(), Arc::new(SystemClock))
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialize application state")?;

    // --- Start background tasks ---

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = state
        .reservations
        .sweeper()
        .clone()
        .spawn(config.reservation.sweep_interval(), shutdown_rx);

    // --- Start the web server ---

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("Invalid listen address")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    sweeper.await.context("Sweeper task panicked")?;
    info!("Stopped");
    Ok(())
}
