//! Full-dataset re-ranking after each crawl tick.
//!
//! The latest tick's rows are read and rewritten inside one transaction, so
//! readers see either the previous ranking or the new one.

use std::cmp::Ordering;

use tracing::debug;

use crate::error::Result;
use crate::model::ModelConfig;

/// Latest-tick row joined with the item's original timestamp and the
/// previous sample's adjustments.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RankInput {
    pub id: i64,
    pub score: i64,
    pub submission_time: i64,
    pub top_rank: Option<i64>,
    pub cumulative_upvotes: i64,
    pub cumulative_expected_upvotes: f64,
    pub original_submission_time: i64,
    pub prev_penalty: Option<f64>,
    pub prev_resubmitted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankUpdate {
    pub id: i64,
    pub penalty: f64,
    pub resubmitted: bool,
    pub raw_rank: i64,
    pub qn_rank: i64,
}

pub async fn recompute(pool: &sqlx::SqlitePool, model: &ModelConfig, sample_time: i64) -> Result<usize> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as::<_, RankInput>(
        r#"
        SELECT s.id, s.score, s.submission_time, s.top_rank,
               s.cumulative_upvotes, s.cumulative_expected_upvotes,
               i.timestamp AS original_submission_time,
               p.penalty AS prev_penalty,
               p.resubmitted AS prev_resubmitted
        FROM samples s
        JOIN items i ON i.id = s.id
        LEFT JOIN samples p
          ON p.id = s.id
         AND p.sample_time = (
             SELECT MAX(sample_time) FROM samples WHERE id = s.id AND sample_time < s.sample_time
         )
        WHERE s.sample_time = ?
        "#,
    )
    .bind(sample_time)
    .fetch_all(&mut *tx)
    .await?;

    let updates = compute_ranks(&rows, sample_time, model);

    for u in &updates {
        sqlx::query(
            r#"
            UPDATE samples
            SET penalty = ?, resubmitted = ?, raw_rank = ?, qn_rank = ?
            WHERE id = ? AND sample_time = ?
            "#,
        )
        .bind(u.penalty)
        .bind(u.resubmitted)
        .bind(u.raw_rank)
        .bind(u.qn_rank)
        .bind(u.id)
        .bind(sample_time)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!(rows = updates.len(), sample_time, "rank recompute committed");
    Ok(updates.len())
}

/// Applies, in order: carry-forward of the previous tick's adjustments,
/// resubmission detection, raw (upstream formula) ranking with the implied
/// penalty, and finally the composite rank.
pub fn compute_ranks(rows: &[RankInput], sample_time: i64, model: &ModelConfig) -> Vec<RankUpdate> {
    let mut updates: Vec<RankUpdate> = rows
        .iter()
        .map(|r| RankUpdate {
            id: r.id,
            penalty: r.prev_penalty.unwrap_or(0.0),
            resubmitted: r.prev_resubmitted.unwrap_or(false),
            raw_rank: 0,
            qn_rank: 0,
        })
        .collect();

    for (u, r) in updates.iter_mut().zip(rows) {
        if r.submission_time > r.original_submission_time {
            u.resubmitted = true;
        }
    }

    let decay_exponent = model.gravity / 0.8;
    let age_hours = |r: &RankInput| (sample_time - r.submission_time).max(0) as f64 / 3600.0;

    let raw_scores: Vec<f64> = rows
        .iter()
        .map(|r| (r.score - 1).max(0) as f64 / (age_hours(r) + 2.0).powf(decay_exponent))
        .collect();
    for (pos, idx) in rank_order(rows, &raw_scores).into_iter().enumerate() {
        let raw_rank = pos as i64 + 1;
        updates[idx].raw_rank = raw_rank;
        if let Some(top_rank) = rows[idx].top_rank {
            updates[idx].penalty = (top_rank as f64 / raw_rank as f64).ln().max(0.0);
        }
    }

    let w = model.params.prior_weight;
    let qn_scores: Vec<f64> = rows
        .iter()
        .map(|r| {
            let ratio = (r.cumulative_upvotes as f64 + w) / (r.cumulative_expected_upvotes + w);
            let age = age_hours(r);
            age.powf(ratio) / (age + 2.0).powf(decay_exponent)
        })
        .collect();
    for (pos, idx) in rank_order(rows, &qn_scores).into_iter().enumerate() {
        updates[idx].qn_rank = pos as i64 + 1;
    }

    updates
}

/// Row indices by score descending, ties broken by id.
fn rank_order(rows: &[RankInput], scores: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..rows.len()).collect();
    idx.sort_by(|&a, &b| match scores[b].total_cmp(&scores[a]) {
        Ordering::Equal => rows[a].id.cmp(&rows[b].id),
        o => o,
    });
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::Crawler;
    use crate::db::models::SampleRow;
    use crate::db::{self, store, test_pool};
    use crate::source::fake::StaticSource;
    use crate::types::Category;
    use std::sync::Arc;

    const HOUR: i64 = 3600;

    fn input(id: i64, score: i64, age_hours: i64, upvotes: i64, expected: f64) -> RankInput {
        RankInput {
            id,
            score,
            submission_time: 100 * HOUR - age_hours * HOUR,
            top_rank: None,
            cumulative_upvotes: upvotes,
            cumulative_expected_upvotes: expected,
            original_submission_time: 100 * HOUR - age_hours * HOUR,
            prev_penalty: None,
            prev_resubmitted: None,
        }
    }

    #[test]
    fn outperforming_item_ranks_first() {
        let rows = vec![
            input(1, 50, 3, 20, 40.0),
            input(2, 50, 3, 40, 20.0),
        ];
        let updates = compute_ranks(&rows, 100 * HOUR, &ModelConfig::default());
        assert_eq!(updates[0].qn_rank, 2);
        assert_eq!(updates[1].qn_rank, 1);
    }

    #[test]
    fn older_items_decay() {
        let rows = vec![input(1, 30, 20, 10, 10.0), input(2, 30, 2, 10, 10.0)];
        let updates = compute_ranks(&rows, 100 * HOUR, &ModelConfig::default());
        assert_eq!(updates[1].qn_rank, 1);
        assert_eq!(updates[1].raw_rank, 1);
    }

    #[test]
    fn ranks_are_a_permutation() {
        let rows: Vec<RankInput> = (1..=40).map(|i| input(i, i * 3 % 17, i % 9 + 1, i % 5, (i % 7) as f64)).collect();
        let updates = compute_ranks(&rows, 100 * HOUR, &ModelConfig::default());
        let mut qn: Vec<i64> = updates.iter().map(|u| u.qn_rank).collect();
        let mut raw: Vec<i64> = updates.iter().map(|u| u.raw_rank).collect();
        qn.sort();
        raw.sort();
        assert_eq!(qn, (1..=40).collect::<Vec<_>>());
        assert_eq!(raw, (1..=40).collect::<Vec<_>>());
    }

    #[test]
    fn carry_forward_resubmission_and_penalty() {
        let mut carried = input(1, 100, 2, 10, 10.0);
        carried.prev_penalty = Some(0.5);
        carried.prev_resubmitted = Some(true);

        let mut resubmitted = input(2, 5, 1, 1, 1.0);
        resubmitted.original_submission_time -= 10 * HOUR;

        // Highest raw score but shown at top rank 4.
        let mut penalized = input(3, 500, 1, 10, 10.0);
        penalized.top_rank = Some(4);

        let updates = compute_ranks(&[carried, resubmitted, penalized], 100 * HOUR, &ModelConfig::default());
        assert_eq!(updates[0].penalty, 0.5);
        assert!(updates[0].resubmitted);
        assert!(updates[1].resubmitted);
        assert_eq!(updates[2].raw_rank, 1);
        assert!((updates[2].penalty - 4f64.ln()).abs() < 1e-12);
    }

    async fn seeded_pool() -> (sqlx::SqlitePool, Crawler) {
        let pool = test_pool().await;
        let source = Arc::new(StaticSource::default());
        source.set_listing(Category::Top, vec![1, 2, 3]);
        for id in 1..=3 {
            source.set_story(id, 10 * id, 0);
        }
        let crawler = Crawler::new(pool.clone(), source, Arc::new(ModelConfig::default()));
        (pool, crawler)
    }

    #[tokio::test]
    async fn recompute_ranks_every_row_of_the_tick() {
        let (pool, crawler) = seeded_pool().await;
        crawler.crawl(HOUR).await.unwrap();

        let ranking = store::latest_ranking(&pool).await.unwrap();
        let mut qn: Vec<i64> = ranking.iter().filter_map(|s| s.qn_rank).collect();
        qn.sort();
        assert_eq!(qn, vec![1, 2, 3]);
    }

    async fn tick_ranks(conn: &mut sqlx::SqliteConnection, sample_time: i64) -> Vec<Option<i64>> {
        sqlx::query_scalar("SELECT qn_rank FROM samples WHERE sample_time = ? ORDER BY id")
            .bind(sample_time)
            .fetch_all(conn)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn concurrent_reader_never_sees_a_partial_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranker.db");
        let pool = db::open_pool(path.to_str().unwrap()).await.unwrap();

        let source = Arc::new(StaticSource::default());
        let ids: Vec<i64> = (1..=40).collect();
        source.set_listing(Category::Top, ids.clone());
        for &id in &ids {
            source.set_story(id, 3 * id % 50 + 1, 0);
        }
        let model = Arc::new(ModelConfig::default());
        let crawler = Crawler::new(pool.clone(), source, Arc::clone(&model));
        crawler.ingest_once(HOUR).await.unwrap();

        // The reader's snapshot starts with its first read.
        let mut reader = pool.begin().await.unwrap();
        assert!(tick_ranks(&mut *reader, HOUR).await.iter().all(Option::is_none));

        let ranked = recompute(&pool, &model, HOUR).await.unwrap();
        assert_eq!(ranked, 40);

        assert!(tick_ranks(&mut *reader, HOUR).await.iter().all(Option::is_none));
        reader.rollback().await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let mut after: Vec<i64> = tick_ranks(&mut *conn, HOUR).await.into_iter().flatten().collect();
        after.sort();
        assert_eq!(after, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failed_recompute_leaves_previous_ranking() {
        let (pool, crawler) = seeded_pool().await;
        crawler.crawl(HOUR).await.unwrap();
        let before = store::latest_ranking(&pool).await.unwrap();

        // Later rows of the tick cannot be rewritten, so the first update must roll back too.
        sqlx::query(
            "CREATE TRIGGER reject_last BEFORE UPDATE ON samples WHEN OLD.id = 3
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("UPDATE samples SET qn_rank = NULL, raw_rank = NULL WHERE id <> 3")
            .execute(&pool)
            .await
            .unwrap();
        let cleared = store::latest_ranking(&pool).await.unwrap();

        assert!(recompute(&pool, &ModelConfig::default(), HOUR).await.is_err());
        let after = store::latest_ranking(&pool).await.unwrap();
        let ranks = |rows: &[SampleRow]| rows.iter().map(|s| (s.id, s.qn_rank)).collect::<Vec<_>>();
        assert_eq!(ranks(&after), ranks(&cleared));
        assert_ne!(ranks(&after), ranks(&before));
    }
}
