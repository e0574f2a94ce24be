//! Shared process plumbing for the four binaries: logging, shutdown
//! signals, and crawl pipeline construction.

use std::sync::Arc;

use enrichment::{
    CrawlPipeline, Downloader, DownloaderConfig, PipelineConfig, RateGate, RateGateConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,enrichment=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

/// Wire the downloader, rate gate, and pipeline from configuration. One
/// pipeline per process; the gate inside enforces the process's share of
/// the global fetch budget.
pub fn build_pipeline(config: &Config) -> Arc<CrawlPipeline> {
    let downloader = Downloader::new(DownloaderConfig {
        size_limit_bytes: config.crawl_page_size_limit_bytes,
        ..DownloaderConfig::default()
    });
    let gate = RateGate::new(RateGateConfig {
        global_concurrency: config.effective_global_concurrency(),
        per_host_concurrency: config.crawl_per_host_concurrency,
    });
    Arc::new(CrawlPipeline::new(
        Arc::new(downloader),
        Arc::new(gate),
        PipelineConfig {
            budget: config.crawl_budget(),
            ttl_hours_days: config.fresh_hours_days,
            ttl_menu_contact_fees_days: config.fresh_menu_contact_price_days,
            ttl_desc_days: config.fresh_desc_features_days,
            ..PipelineConfig::default()
        },
    ))
}
