use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::archive::blob::{self, archive_key};
use crate::archive::store::ArchiveStore;
use crate::config::{ARCHIVE_BATCH_SIZE, ARCHIVE_WORKERS};
use crate::db::models::ArchiveCandidate;
use crate::db::store;
use crate::error::Result;
use crate::model::ModelParams;
use crate::types::now_secs;

/// Wakes the worker for one pass that must finish by `deadline`.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSignal {
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Idle,
    Selecting,
    Uploading,
    Deleting,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub selected: usize,
    pub uploaded: usize,
    pub already_archived: usize,
    pub failed: usize,
    pub purged_items: usize,
    pub purged_samples: u64,
}

#[derive(Debug)]
enum UploadOutcome {
    Uploaded,
    AlreadyArchived,
    Failed(String),
}

/// Offloads old time series to the archive store, then deletes them locally.
/// Only runs when signalled; never schedules itself.
pub struct ArchiveWorker {
    pool: sqlx::SqlitePool,
    store: Arc<dyn ArchiveStore>,
    params: ModelParams,
    archive_after_secs: i64,
    signal_rx: mpsc::Receiver<ArchiveSignal>,
    health: Arc<HealthState>,
    state: ArchiveState,
}

impl ArchiveWorker {
    pub fn new(
        pool: sqlx::SqlitePool,
        store: Arc<dyn ArchiveStore>,
        params: ModelParams,
        archive_after_days: i64,
        signal_rx: mpsc::Receiver<ArchiveSignal>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            pool,
            store,
            params,
            archive_after_secs: archive_after_days * 86_400,
            signal_rx,
            health,
            state: ArchiveState::Idle,
        }
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    pub async fn run(mut self) {
        while let Some(signal) = self.signal_rx.recv().await {
            self.health.set_archive_running(true);
            match tokio::time::timeout_at(signal.deadline, self.archive_pass(now_secs())).await {
                Ok(Ok(report)) if report.selected > 0 => info!(
                    selected = report.selected,
                    uploaded = report.uploaded,
                    already_archived = report.already_archived,
                    failed = report.failed,
                    purged_items = report.purged_items,
                    purged_samples = report.purged_samples,
                    "archive pass complete"
                ),
                Ok(Ok(_)) => debug!("nothing to archive"),
                Ok(Err(e)) => error!("Archive pass failed: {e}"),
                Err(_) => warn!(state = ?self.state(), "archive pass hit its deadline"),
            }
            self.set_state(ArchiveState::Idle);
            self.health.set_archive_running(false);
        }
    }

    pub async fn archive_pass(&mut self, now: i64) -> Result<ArchiveReport> {
        self.set_state(ArchiveState::Selecting);
        let candidates =
            store::archive_candidates(&self.pool, now - self.archive_after_secs, ARCHIVE_BATCH_SIZE).await?;
        let mut report = ArchiveReport { selected: candidates.len(), ..Default::default() };
        if candidates.is_empty() {
            self.set_state(ArchiveState::Idle);
            return Ok(report);
        }

        self.set_state(ArchiveState::Uploading);
        let outcomes = self.upload_all(&candidates).await;

        // Deletes run one at a time, only after every upload has reported.
        self.set_state(ArchiveState::Deleting);
        for (candidate, outcome) in outcomes {
            let item_id = candidate.id;
            match outcome {
                UploadOutcome::Uploaded => report.uploaded += 1,
                UploadOutcome::AlreadyArchived => report.already_archived += 1,
                UploadOutcome::Failed(reason) => {
                    warn!(item_id, "archive upload failed, will retry: {reason}");
                    report.failed += 1;
                    continue;
                }
            }
            report.purged_samples += store::purge_item(&self.pool, &self.params, item_id).await?;
            report.purged_items += 1;
        }

        self.set_state(ArchiveState::Idle);
        Ok(report)
    }

    /// Fans candidates out to a fixed pool of upload tasks and collects one
    /// outcome per candidate. Dropping the returned future aborts the tasks.
    async fn upload_all(&self, candidates: &[ArchiveCandidate]) -> Vec<(ArchiveCandidate, UploadOutcome)> {
        let (job_tx, job_rx) = mpsc::channel::<ArchiveCandidate>(candidates.len());
        for &candidate in candidates {
            // Capacity equals the candidate count, so this never fails.
            let _ = job_tx.try_send(candidate);
        }
        drop(job_tx);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::channel(candidates.len());
        let mut workers = JoinSet::new();
        for _ in 0..ARCHIVE_WORKERS.min(candidates.len()) {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let pool = self.pool.clone();
            let store = Arc::clone(&self.store);
            let params = self.params;
            workers.spawn(async move {
                loop {
                    let next = job_rx.lock().await.recv().await;
                    let Some(candidate) = next else { break };
                    let outcome = upload_one(&pool, store.as_ref(), &params, candidate).await;
                    if result_tx.send((candidate, outcome)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut outcomes = Vec::with_capacity(candidates.len());
        while let Some(result) = result_rx.recv().await {
            outcomes.push(result);
        }
        while workers.join_next().await.is_some() {}
        outcomes
    }

    fn set_state(&mut self, state: ArchiveState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "archive worker state");
            self.state = state;
        }
    }
}

async fn upload_one(
    pool: &sqlx::SqlitePool,
    store: &dyn ArchiveStore,
    params: &ModelParams,
    candidate: ArchiveCandidate,
) -> UploadOutcome {
    let key = archive_key(candidate.id, candidate.generation);
    match store.exists(&key).await {
        Ok(true) => return UploadOutcome::AlreadyArchived,
        Ok(false) => {}
        Err(e) => return UploadOutcome::Failed(e.to_string()),
    }
    let bytes = match blob::generate(pool, params, candidate.id).await {
        Ok(b) => b,
        Err(e) => return UploadOutcome::Failed(e.to_string()),
    };
    match store.upload(&key, bytes, blob::CONTENT_TYPE).await {
        Ok(()) => UploadOutcome::Uploaded,
        Err(e) => UploadOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::blob::ArchiveData;
    use crate::archive::store::MemoryArchiveStore;
    use crate::crawler::Crawler;
    use crate::db::test_pool;
    use crate::model::ModelConfig;
    use crate::source::fake::StaticSource;
    use crate::types::Category;
    use crate::positions::vote::{record_vote, user_positions};
    use std::time::Duration;

    const DAY: i64 = 86_400;
    const NOW: i64 = 40 * DAY;

    async fn seed(pool: &sqlx::SqlitePool, id: i64, sample_times: &[i64]) {
        sqlx::query("INSERT INTO items (id, title, timestamp) VALUES (?, 'story', 0)")
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
        for (i, t) in sample_times.iter().enumerate() {
            sqlx::query(
                "INSERT INTO samples (id, score, descendants, submission_time, sample_time, top_rank, cumulative_upvotes, cumulative_expected_upvotes)
                 VALUES (?, ?, 0, 0, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(i as i64 + 1)
            .bind(t)
            .bind(i as i64 + 1)
            .bind(i as i64)
            .bind(i as f64 * 0.5)
            .execute(pool)
            .await
            .unwrap();
        }
    }

    async fn sample_count(pool: &sqlx::SqlitePool, id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM samples WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn worker(pool: sqlx::SqlitePool, store: Arc<MemoryArchiveStore>) -> (ArchiveWorker, mpsc::Sender<ArchiveSignal>) {
        let (tx, rx) = mpsc::channel(1);
        let w = ArchiveWorker::new(pool, store, ModelParams::default(), 21, rx, Arc::new(HealthState::new()));
        (w, tx)
    }

    /// Items 1 and 2 are old; item 3 is in the latest crawl.
    async fn seeded() -> sqlx::SqlitePool {
        let pool = test_pool().await;
        seed(&pool, 1, &[DAY, DAY + 60, DAY + 120]).await;
        seed(&pool, 2, &[2 * DAY, 2 * DAY + 60]).await;
        seed(&pool, 3, &[NOW - 60]).await;
        pool
    }

    #[tokio::test]
    async fn successful_upload_purges_failed_upload_retries() {
        let pool = seeded().await;
        let store = Arc::new(MemoryArchiveStore::new());
        store.fail_uploads_for("2.json");
        let (mut w, _tx) = worker(pool.clone(), store.clone());

        let report = w.archive_pass(NOW).await.unwrap();
        assert_eq!(report.selected, 2);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.purged_samples, 3);
        assert_eq!(w.state(), ArchiveState::Idle);

        assert_eq!(sample_count(&pool, 1).await, 0);
        assert_eq!(sample_count(&pool, 2).await, 2);
        assert_eq!(sample_count(&pool, 3).await, 1);

        let (content_type, body) = store.get("1.json").unwrap();
        assert_eq!(content_type, "application/json");
        let data: ArchiveData = serde_json::from_slice(&body).unwrap();
        assert_eq!(data.max_sample_time, DAY + 120);
        assert_eq!(data.ranks_plot_data.len(), 3);

        // The failed item comes back; the archived one does not.
        let retry = store::archive_candidates(&pool, NOW - 21 * DAY, 20).await.unwrap();
        assert_eq!(retry, vec![ArchiveCandidate { id: 2, generation: 0 }]);
        store.clear_failures();
        let report = w.archive_pass(NOW).await.unwrap();
        assert_eq!((report.selected, report.uploaded), (1, 1));
        assert_eq!(sample_count(&pool, 2).await, 0);
    }

    #[tokio::test]
    async fn already_archived_items_are_purged_without_reupload() {
        let pool = seeded().await;
        let store = Arc::new(MemoryArchiveStore::new());
        store.upload("1.json", b"old".to_vec(), "application/json").await.unwrap();
        let (mut w, _tx) = worker(pool.clone(), store.clone());

        let report = w.archive_pass(NOW).await.unwrap();
        assert_eq!(report.already_archived, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(store.get("1.json").unwrap().1, b"old".to_vec());
        assert_eq!(sample_count(&pool, 1).await, 0);
    }

    #[tokio::test]
    async fn purge_closes_open_positions() {
        let pool = seeded().await;
        let params = ModelParams::default();
        record_vote(&pool, &params, 9, 1, 1, DAY + 30).await.unwrap();
        let store = Arc::new(MemoryArchiveStore::new());
        let (mut w, _tx) = worker(pool.clone(), store);

        w.archive_pass(NOW).await.unwrap();
        let positions = user_positions(&pool, 9).await.unwrap();
        assert_eq!(positions[0].exit_time, Some(DAY + 120));
        assert_eq!(positions[0].exit_upvotes, Some(2));
    }

    #[tokio::test]
    async fn resurfaced_item_is_archived_again_under_next_generation() {
        let pool = seeded().await;
        let store = Arc::new(MemoryArchiveStore::new());
        let (mut w, _tx) = worker(pool.clone(), store.clone());
        assert_eq!(w.archive_pass(NOW).await.unwrap().purged_items, 2);

        let source = Arc::new(StaticSource::default());
        source.set_story(1, 40, 0);
        source.set_story(3, 5, 0);
        let crawler = Crawler::new(pool.clone(), source.clone(), Arc::new(ModelConfig::default()));

        let seen_again = NOW + DAY;
        source.set_listing(Category::Top, vec![1]);
        crawler.crawl(seen_again).await.unwrap();
        let item = store::item(&pool, 1).await.unwrap().unwrap();
        assert!(!item.archived);
        assert_eq!(item.archive_generation, 1);

        source.set_listing(Category::Top, vec![3]);
        crawler.crawl(seen_again + 60).await.unwrap();

        let report = w.archive_pass(seen_again + 30 * DAY).await.unwrap();
        assert_eq!((report.selected, report.uploaded, report.already_archived), (1, 1, 0));
        assert_eq!(sample_count(&pool, 1).await, 0);

        let first: ArchiveData = serde_json::from_slice(&store.get("1.json").unwrap().1).unwrap();
        let second: ArchiveData = serde_json::from_slice(&store.get("1.1.json").unwrap().1).unwrap();
        assert_eq!(first.max_sample_time, DAY + 120);
        assert_eq!(second.max_sample_time, seen_again);
        assert_eq!(store::item(&pool, 1).await.unwrap().unwrap().archive_generation, 2);
    }

    #[tokio::test]
    async fn recent_items_are_not_selected() {
        let pool = seeded().await;
        let store = Arc::new(MemoryArchiveStore::new());
        let (mut w, _tx) = worker(pool, store);
        let report = w.archive_pass(10 * DAY).await.unwrap();
        assert_eq!(report, ArchiveReport::default());
    }

    #[tokio::test]
    async fn run_processes_signals_until_channel_closes() {
        let pool = seeded().await;
        let store = Arc::new(MemoryArchiveStore::new());
        let (w, tx) = worker(pool.clone(), store.clone());
        let handle = tokio::spawn(w.run());

        tx.send(ArchiveSignal { deadline: Instant::now() + Duration::from_secs(30) })
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();
        // The worker selects relative to the wall clock, so the old items are candidates.
        assert!(store.get("1.json").is_some());
        assert!(store.get("2.json").is_some());
    }
}
