//! Queries over the persisted time series shared by several components.

use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{ArchiveCandidate, ItemRow, LastSeenRow, SampleRow};
use crate::error::Result;
use crate::model::ModelParams;
use crate::types::{Ranks, Story};

const SAMPLE_COLUMNS: &str = "id, score, descendants, submission_time, sample_time, \
     top_rank, new_rank, best_rank, ask_rank, show_rank, \
     cumulative_upvotes, cumulative_expected_upvotes, raw_rank, qn_rank, penalty, resubmitted";

/// Sample time of the most recent crawl, if any.
pub async fn last_sample_time(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    let t: Option<i64> = sqlx::query_scalar("SELECT MAX(sample_time) FROM samples")
        .fetch_one(conn)
        .await?;
    Ok(t)
}

pub async fn last_seen(conn: &mut SqliteConnection, item_id: i64) -> Result<Option<LastSeenRow>> {
    let row = sqlx::query_as::<_, LastSeenRow>(
        r#"
        SELECT score, cumulative_upvotes, cumulative_expected_upvotes
        FROM samples
        WHERE id = ?
        ORDER BY sample_time DESC
        LIMIT 1
        "#,
    )
    .bind(item_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn latest_sample(conn: &mut SqliteConnection, item_id: i64) -> Result<Option<SampleRow>> {
    let sql = format!(
        "SELECT {SAMPLE_COLUMNS} FROM samples WHERE id = ? ORDER BY sample_time DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, SampleRow>(&sql)
        .bind(item_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// Full time series for one item, oldest first.
pub async fn item_samples(pool: &SqlitePool, item_id: i64) -> Result<Vec<SampleRow>> {
    let sql = format!("SELECT {SAMPLE_COLUMNS} FROM samples WHERE id = ? ORDER BY sample_time");
    let rows = sqlx::query_as::<_, SampleRow>(&sql)
        .bind(item_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Samples of the latest tick, ordered by composite rank.
pub async fn latest_ranking(pool: &SqlitePool) -> Result<Vec<SampleRow>> {
    let sql = format!(
        "SELECT {SAMPLE_COLUMNS} FROM samples \
         WHERE sample_time = (SELECT MAX(sample_time) FROM samples) \
         ORDER BY qn_rank IS NULL, qn_rank, id"
    );
    let rows = sqlx::query_as::<_, SampleRow>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

pub async fn item(pool: &SqlitePool, item_id: i64) -> Result<Option<ItemRow>> {
    let row = sqlx::query_as::<_, ItemRow>(
        "SELECT id, by, title, url, timestamp, job, archived, archive_generation FROM items WHERE id = ?",
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Inserts a newly seen item. Later sightings refresh the metadata but keep
/// the original submission timestamp. Sighting an archived item clears the
/// flag so its new series is archived again under the next generation.
pub async fn upsert_item(conn: &mut SqliteConnection, story: &Story) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO items (id, by, title, url, timestamp, job)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            by = excluded.by,
            title = excluded.title,
            url = excluded.url,
            job = excluded.job,
            archived = 0
        "#,
    )
    .bind(story.id)
    .bind(&story.by)
    .bind(&story.title)
    .bind(&story.url)
    .bind(story.submission_time)
    .bind(story.job)
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewSample<'a> {
    pub story: &'a Story,
    pub sample_time: i64,
    pub ranks: Ranks,
    pub cumulative_upvotes: i64,
    pub cumulative_expected_upvotes: f64,
}

pub async fn insert_sample(conn: &mut SqliteConnection, s: &NewSample<'_>) -> Result<()> {
    let rank = |i: usize| s.ranks[i].map(i64::from);
    sqlx::query(
        r#"
        INSERT INTO samples (
            id, score, descendants, submission_time, sample_time,
            top_rank, new_rank, best_rank, ask_rank, show_rank,
            cumulative_upvotes, cumulative_expected_upvotes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(s.story.id)
    .bind(s.story.score)
    .bind(s.story.descendants)
    .bind(s.story.submission_time)
    .bind(s.sample_time)
    .bind(rank(0))
    .bind(rank(1))
    .bind(rank(2))
    .bind(rank(3))
    .bind(rank(4))
    .bind(s.cumulative_upvotes)
    .bind(s.cumulative_expected_upvotes)
    .execute(conn)
    .await?;
    Ok(())
}

/// Items whose last sample is at or before `cutoff`, that were not part of
/// the latest crawl and have not been archived since they were last seen.
pub async fn archive_candidates(pool: &SqlitePool, cutoff: i64, limit: i64) -> Result<Vec<ArchiveCandidate>> {
    let candidates = sqlx::query_as::<_, ArchiveCandidate>(
        r#"
        SELECT s.id, i.archive_generation AS generation
        FROM samples s
        JOIN items i ON i.id = s.id
        WHERE i.archived = 0
          AND s.id NOT IN (
              SELECT id FROM samples WHERE sample_time = (SELECT MAX(sample_time) FROM samples)
          )
        GROUP BY s.id
        HAVING MAX(s.sample_time) <= ?
        ORDER BY MAX(s.sample_time), s.id
        LIMIT ?
        "#,
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(candidates)
}

/// Closes open positions on the item against its final sample, deletes all
/// of its samples and flags it archived, in one transaction. Returns the
/// number of samples deleted.
pub async fn purge_item(pool: &SqlitePool, params: &ModelParams, item_id: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;

    if let Some(last) = latest_sample(&mut *tx, item_id).await? {
        let rate = params.upvote_rate(last.cumulative_upvotes, last.cumulative_expected_upvotes);
        sqlx::query(
            r#"
            UPDATE positions
            SET exit_time = ?, exit_upvotes = ?, exit_expected_upvotes = ?, exit_upvote_rate = ?
            WHERE item_id = ? AND exit_time IS NULL
            "#,
        )
        .bind(last.sample_time)
        .bind(last.cumulative_upvotes)
        .bind(last.cumulative_expected_upvotes)
        .bind(rate)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;
    }

    let deleted = sqlx::query("DELETE FROM samples WHERE id = ?")
        .bind(item_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("UPDATE items SET archived = 1, archive_generation = archive_generation + 1 WHERE id = ?")
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(deleted)
}
