use std::sync::Arc;

use flocus::{app, build_state, spawn_maintenance, AppConfig, SystemClock};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging. Reads RUST_LOG environment variable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    let port = config.port;
    let state = build_state(config, Arc::new(SystemClock)).await?;
    let maintenance = spawn_maintenance(state.clone());
    let app = app(state);

    // The bridge only ever serves the local extension.
    let addr: std::net::SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    if let Some(handle) = maintenance {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
