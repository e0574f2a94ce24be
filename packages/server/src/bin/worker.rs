// Crawl worker: claims jobs and runs crawl → extract → unify.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use server_core::runtime::{build_pipeline, init_tracing, shutdown_signal};
use server_core::store::Store;
use server_core::worker::WorkerPool;
use server_core::Config;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "worker", about = "VenueScope crawl worker")]
struct Args {
    /// Worker loops in this process (overrides WORKER_COUNT)
    #[arg(long)]
    workers: Option<usize>,
    /// Jobs claimed per batch (overrides WORKER_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(batch_size) = args.batch_size {
        config.worker_batch_size = batch_size;
    }

    let store = Store::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    store.migrate().await.context("failed to run migrations")?;

    let pipeline = build_pipeline(&config);
    let pool = Arc::new(WorkerPool::new(store, pipeline, &config));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(pool.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();
    handle.await.context("worker pool panicked")??;

    Ok(())
}
