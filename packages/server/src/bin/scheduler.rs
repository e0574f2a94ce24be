// Freshness scheduler: enqueues background crawls for stale venues.

use anyhow::{Context, Result};
use clap::Parser;
use server_core::runtime::{init_tracing, shutdown_signal};
use server_core::scheduler::Scheduler;
use server_core::store::Store;
use server_core::Config;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "scheduler", about = "VenueScope freshness scheduler")]
struct Args {
    /// Seconds between cycles (overrides SCHEDULER_SLEEP_SECONDS)
    #[arg(long)]
    sleep_seconds: Option<u64>,
    /// Venues per cycle (overrides SCHEDULER_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(sleep_seconds) = args.sleep_seconds {
        config.scheduler_sleep_seconds = sleep_seconds;
    }
    if let Some(batch_size) = args.batch_size {
        config.scheduler_batch_size = batch_size;
    }

    let store = Store::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    store.migrate().await.context("failed to run migrations")?;

    let scheduler = Scheduler::new(store, &config);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();
    handle.await.context("scheduler panicked")??;

    Ok(())
}
