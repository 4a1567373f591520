use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod http;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taleforge_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("TALEFORGE_CONFIG").ok();
    let config = taleforge_core::TaleforgeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        taleforge_core::TaleforgeConfig::default()
    });

    if config.model.api_key.is_none() {
        tracing::warn!("no model API key configured — turns will fail until one is set");
    }

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "taleforge gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
