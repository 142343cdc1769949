use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::archive::ArchiveSignal;
use crate::config::{ARCHIVE_SIGNAL_MIN_REMAINING_SECS, TICK_SLACK_SECS};
use crate::crawler::ingest::{Crawler, IngestStats};
use crate::db::store;
use crate::error::Result;
use crate::types::now_secs;

/// Drives one crawl per wall-clock minute. Each tick must finish before the
/// next minute boundary minus [`TICK_SLACK_SECS`], so ticks never overlap.
pub struct CrawlScheduler {
    crawler: Crawler,
    pool: sqlx::SqlitePool,
    archive_tx: Option<mpsc::Sender<ArchiveSignal>>,
    health: Arc<HealthState>,
}

impl CrawlScheduler {
    pub fn new(
        crawler: Crawler,
        pool: sqlx::SqlitePool,
        archive_tx: Option<mpsc::Sender<ArchiveSignal>>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { crawler, pool, archive_tx, health }
    }

    pub async fn run(self) {
        match self.last_crawl_time().await {
            Ok(last) => {
                self.health.set_last_crawl_at(last.unwrap_or(0));
                if catch_up_due(last, now_secs()) {
                    info!(last_crawl = ?last, "catching up with an immediate crawl");
                    self.tick().await;
                }
            }
            Err(e) => error!("Could not read last crawl time: {e}"),
        }

        loop {
            // Re-armed from the wall clock every time so suspension self-corrects.
            let delay = seconds_until_next_minute(now_secs());
            tokio::time::sleep(Duration::from_secs(delay)).await;
            self.tick().await;
        }
    }

    async fn last_crawl_time(&self) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        store::last_sample_time(&mut conn).await
    }

    async fn tick(&self) {
        let sample_time = now_secs();
        let remaining = seconds_until_next_minute(sample_time);
        let deadline = Instant::now() + Duration::from_secs(remaining.saturating_sub(TICK_SLACK_SECS));

        match self.run_tick(sample_time, deadline).await {
            Ok(_) => {
                self.health.record_crawl_ok(sample_time);
                let left = deadline.saturating_duration_since(Instant::now());
                if left >= Duration::from_secs(ARCHIVE_SIGNAL_MIN_REMAINING_SECS) {
                    if let Some(tx) = &self.archive_tx {
                        hand_off(tx, ArchiveSignal { deadline });
                    }
                }
            }
            Err(e) if e.is_deadline() => {
                self.health.record_crawl_timed_out();
                warn!(sample_time, "crawl abandoned at tick deadline");
            }
            Err(e) => {
                self.health.record_crawl_failed();
                error!(sample_time, "Crawl failed: {e}");
            }
        }
    }

    /// One crawl bounded by `deadline`.
    pub async fn run_tick(&self, sample_time: i64, deadline: Instant) -> Result<IngestStats> {
        tokio::time::timeout_at(deadline, self.crawler.crawl(sample_time)).await?
    }
}

/// Always in `1..=60`: a call exactly on a boundary waits a full minute.
pub fn seconds_until_next_minute(unix_secs: i64) -> u64 {
    (60 - unix_secs.rem_euclid(60)) as u64
}

/// A startup crawl is due once a minute has passed since the last one,
/// unless the current minute is too far gone to fit a tick.
pub fn catch_up_due(last_crawl: Option<i64>, now: i64) -> bool {
    last_crawl.map_or(true, |t| now - t >= 60) && seconds_until_next_minute(now) > TICK_SLACK_SECS
}

/// Non-blocking signal to the archive worker. A busy worker means the
/// signal is dropped. Returns whether it was delivered.
pub fn hand_off(tx: &mpsc::Sender<ArchiveSignal>, signal: ArchiveSignal) -> bool {
    match tx.try_send(signal) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("archive worker busy, skipping this tick");
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!("archive worker has stopped");
            false
        }
    }
}
