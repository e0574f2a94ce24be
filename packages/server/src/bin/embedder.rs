// Embedding producer: vectors for enriched venues via an
// OpenAI-compatible embeddings endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use server_core::embedder::{EmbeddingProducer, HttpEmbeddingClient};
use server_core::runtime::{init_tracing, shutdown_signal};
use server_core::store::Store;
use server_core::Config;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "embedder", about = "VenueScope embedding producer")]
struct Args {
    /// Seconds between cycles
    #[arg(long, default_value_t = 60)]
    sleep_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    let client = HttpEmbeddingClient::from_config(&config)?
        .context("EMBEDDING_API_URL must be set for the embedding producer")?;

    let store = Store::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    store.migrate().await.context("failed to run migrations")?;

    let producer = EmbeddingProducer::new(
        store,
        Box::new(client),
        Duration::from_secs(args.sleep_seconds),
    );
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(producer.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();
    handle.await.context("embedding producer panicked")??;

    Ok(())
}
