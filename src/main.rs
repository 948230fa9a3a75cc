//! weather-gateway server entry point.
//!
//! Connects to the chain and the database, starts the registry watcher,
//! and serves the REST API until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use weather_gateway::api;
use weather_gateway::app_state::AppState;
use weather_gateway::auth::SigningDomain;
use weather_gateway::chain::{AlloyChainClient, ChainClient};
use weather_gateway::config::ServiceConfig;
use weather_gateway::domain::CallWindow;
use weather_gateway::persistence::RegistryStore;
use weather_gateway::persistence::postgres::PostgresStore;
use weather_gateway::service::{ChainWatcher, ReportService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = ServiceConfig::from_env().context("loading configuration")?;
    tracing::info!(addr = %config.listen_addr, chain = %config.chain_name, "starting weather-gateway");

    if let Some(worker) = config.verify_worker_identity()? {
        tracing::info!(%worker, "worker identity verified");
    }

    // Chain access
    let client = Arc::new(
        AlloyChainClient::connect(&config.chain_rpc_url)
            .await
            .context("connecting to chain rpc")?,
    );
    let chain_id = client.chain_id().await.context("reading chain id")?;
    tracing::info!(chain_id, contract = %config.registration_contract, "chain ready");

    // Storage
    PostgresStore::migrate(&config.database_url)
        .await
        .context("applying migrations")?;
    let pool = PostgresStore::open_pool(&config.database_url, config.database_max_connections)
        .await
        .context("opening database pool")?;
    let store: Arc<dyn RegistryStore> = Arc::new(PostgresStore::new(Arc::clone(&pool)));

    // Watcher
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = ChainWatcher::new(Arc::clone(&client), Arc::clone(&store), config.watcher_config());
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

    // Build service layer and application state
    let report_service = Arc::new(ReportService::new(
        store,
        SigningDomain::new(chain_id, config.registration_contract),
        CallWindow::default(),
    ));
    let app_state = AppState::new(report_service, config.max_concurrent_requests);

    // Build router
    let app = api::build_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Drain
    match tokio::time::timeout(config.shutdown_timeout, watcher_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "chain watcher task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "chain watcher did not stop in time"
        ),
    }
    pool.close().await;
    tracing::info!("shutdown complete");

    Ok(())
}
