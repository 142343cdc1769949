mod api;
mod archive;
mod config;
mod crawler;
mod db;
mod error;
mod model;
mod positions;
mod scorer;
mod source;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::archive::{ArchiveStore, ArchiveWorker, DirArchiveStore, HttpArchiveStore};
use crate::config::{ArchiveTarget, Config, LogFormat};
use crate::crawler::{CrawlScheduler, Crawler};
use crate::error::Result;
use crate::model::ModelConfig;
use crate::source::{HnApiSource, StorySource};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&cfg);

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    match cfg.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Model ---
    let model = Arc::new(ModelConfig::from_config(&cfg)?);
    info!(
        fatigue_factor = model.params.fatigue_factor,
        prior_weight = model.params.prior_weight,
        gravity = model.gravity,
        "model loaded"
    );

    // --- Database setup ---
    let pool = db::open_pool(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let health = Arc::new(HealthState::new());

    // --- Archive worker ---
    let archive_store: Option<Arc<dyn ArchiveStore>> = match &cfg.archive_target {
        Some(ArchiveTarget::Dir(dir)) => Some(Arc::new(DirArchiveStore::open(dir).await?)),
        Some(ArchiveTarget::Http(url)) => Some(Arc::new(HttpArchiveStore::new(url.clone())?)),
        None => None,
    };
    let archive_tx = match archive_store {
        Some(store) => {
            let (tx, rx) = mpsc::channel(1);
            let worker = ArchiveWorker::new(
                pool.clone(),
                store,
                model.params,
                cfg.archive_after_days,
                rx,
                Arc::clone(&health),
            );
            tokio::spawn(worker.run());
            info!(archive = ?cfg.archive_target, "archive worker started");
            Some(tx)
        }
        None => {
            warn!("ARCHIVE_DIR / ARCHIVE_URL not set, old samples will not be archived");
            None
        }
    };

    // --- Crawl scheduler ---
    let source: Arc<dyn StorySource> = Arc::new(HnApiSource::new(cfg.hn_api_url.clone())?);
    let crawler = Crawler::new(pool.clone(), source, Arc::clone(&model));
    let scheduler = CrawlScheduler::new(crawler, pool.clone(), archive_tx, Arc::clone(&health));
    tokio::spawn(scheduler.run());

    // --- HTTP API server ---
    let app = router(ApiState { pool: pool.clone(), model, health });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
