//! `agora shield` - the edge reverse proxy.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use agora::cache::SharedCache;
use agora::config::Config;
use agora::shield::proxy::{self, ProxyState};
use agora::shield::{automanager, RiskShield};

pub async fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let shield = RiskShield::new(
        SharedCache::new(),
        config.block_threshold,
        Duration::from_secs(config.block_ttl_secs),
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let manager = tokio::spawn(automanager::run(shield.clone(), cancel_rx));

    let state = ProxyState::new(
        shield,
        config.backend_url.clone(),
        config.shield_admin_token.clone(),
    );
    let app = proxy::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.shield_port)).await?;
    info!(
        port = config.shield_port,
        backend = %config.backend_url,
        "agora shield listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = cancel_tx.send(true);
    let _ = manager.await;
    info!("agora shield stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
