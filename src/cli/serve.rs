//! `agora serve` - the API server.

use std::sync::Arc;

use tracing::info;

use agora::api::{self, AppContext};
use agora::chain::anchor::{AnchorPolicy, HttpLedger, LedgerClient, NoopLedger};
use agora::config::Config;
use agora::secrets::SecretsProvider;
use agora::workers::Workers;

pub async fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let secrets = SecretsProvider::load(&config).await?;
    let ctx = AppContext::initialize(config.clone(), secrets).await?;

    let ledger: Arc<dyn LedgerClient> = match &config.ledger_url {
        Some(url) => Arc::new(HttpLedger::new(url.clone(), config.ledger_timeout)),
        None => Arc::new(NoopLedger),
    };
    let workers = Workers::spawn(
        ctx.pool.clone(),
        ctx.cache.clone(),
        ledger,
        AnchorPolicy {
            every_n: config.anchor_every_n,
            every_secs: config.anchor_every_secs,
        },
    );

    let app = api::router(ctx.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "agora api listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: workers first, then pools.
    workers.shutdown().await;
    ctx.pool.close().await;
    info!("agora api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
