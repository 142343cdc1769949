//! Shared health state for the /health endpoints.
//! Updated by the crawl scheduler and the archive worker.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    /// Sample time of the last successful crawl (0 = none yet).
    last_crawl_at: AtomicI64,
    crawls_ok: AtomicU64,
    crawls_failed: AtomicU64,
    crawls_timed_out: AtomicU64,
    archive_running: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub last_crawl_at: i64,
    pub crawls_ok: u64,
    pub crawls_failed: u64,
    pub crawls_timed_out: u64,
    pub archive_running: bool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_crawl_ok(&self, sample_time: i64) {
        self.last_crawl_at.store(sample_time, Ordering::Relaxed);
        self.crawls_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crawl_failed(&self) {
        self.crawls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crawl_timed_out(&self) {
        self.crawls_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_crawl_at(&self, t: i64) {
        self.last_crawl_at.store(t, Ordering::Relaxed);
    }

    pub fn set_archive_running(&self, v: bool) {
        self.archive_running.store(v, Ordering::Relaxed);
    }

    pub fn last_crawl_at(&self) -> i64 {
        self.last_crawl_at.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            last_crawl_at: self.last_crawl_at(),
            crawls_ok: self.crawls_ok.load(Ordering::Relaxed),
            crawls_failed: self.crawls_failed.load(Ordering::Relaxed),
            crawls_timed_out: self.crawls_timed_out.load(Ordering::Relaxed),
            archive_running: self.archive_running.load(Ordering::Relaxed),
        }
    }
}
