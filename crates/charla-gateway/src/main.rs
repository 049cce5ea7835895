use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

mod app;
mod deliver;
mod http;
mod notify;
mod providers;
mod registry;
mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charla_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: CHARLA_CONFIG env > ~/.charla/charla.toml > defaults
    let config_path = std::env::var("CHARLA_CONFIG").ok();
    let config = charla_core::config::CharlaConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        charla_core::config::CharlaConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config)?);
    let router = app::build_router(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(workers::run_debounce_worker(state.clone(), shutdown_rx.clone()));
    tokio::spawn(workers::run_followup_worker(state.clone(), shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Charla gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
