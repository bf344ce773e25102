//! vectorbase server — binds the REST front door to an object-store
//! backed vector database (spec.md §1-§2).
//!
//! Usage:
//!   cargo run --bin vectorbase

use tracing_subscriber::EnvFilter;
use vectorbase::config::Config;
use vectorbase::rest::create_router;
use vectorbase::store::ObjectStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cfg = Config::from_env();
    let store = ObjectStore::from_config(&cfg)?;
    let bind_addr = cfg.http_bind_addr.clone();

    tracing::info!(bind_addr, "vectorbase starting");

    let app = create_router(store, cfg);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
