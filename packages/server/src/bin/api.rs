// API server: geographic venue queries with freshness-driven realtime
// crawl enqueueing.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use server_core::embedder::HttpEmbeddingClient;
use server_core::runtime::{init_tracing, shutdown_signal};
use server_core::server::{build_app, AppState};
use server_core::store::Store;
use server_core::Config;

#[derive(Parser)]
#[command(name = "api", about = "VenueScope API server")]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    let port = args.port.unwrap_or(config.port);

    let store = Store::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    store.migrate().await.context("failed to run migrations")?;
    tracing::info!("database ready");

    let embedder = HttpEmbeddingClient::from_config(&config)?
        .map(|client| Arc::new(client) as Arc<dyn server_core::embedder::EmbeddingClient>);
    if embedder.is_none() {
        tracing::info!("no embedding backend configured, ranking by popularity + distance");
    }

    let state = AppState {
        store,
        config: Arc::new(config),
        embedder,
    };
    let app = build_app(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(%addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind listen address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("API server stopped");
    Ok(())
}
