use serde::Serialize;
use tracing::debug;

use crate::db::models::PositionRow;
use crate::db::store;
use crate::error::{AppError, Result};
use crate::model::ModelParams;
use crate::types::Direction;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    /// The open position after the vote, if any.
    pub position_id: Option<i64>,
    pub entry_upvote_rate: f64,
    /// False when the vote repeated the open position or cleared nothing.
    pub created: bool,
}

/// Records a user's vote on an item.
///
/// Repeating the direction of the open position changes nothing. Any other
/// vote closes the open position against the item's latest sample and, for
/// a non-zero direction, opens a new one from that same sample.
pub async fn record_vote(
    pool: &sqlx::SqlitePool,
    params: &ModelParams,
    user_id: i64,
    item_id: i64,
    direction: i64,
    now: i64,
) -> Result<VoteOutcome> {
    if item_id <= 0 {
        return Err(AppError::InvalidVote(format!("invalid item id {item_id}")));
    }
    let direction = Direction::from_i64(direction)
        .ok_or_else(|| AppError::InvalidVote(format!("direction must be -1, 0 or 1, got {direction}")))?;

    let mut tx = pool.begin().await?;

    let job: Option<bool> = sqlx::query_scalar("SELECT job FROM items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;
    match job {
        None => return Err(AppError::ItemNotFound(item_id)),
        Some(true) => return Err(AppError::InvalidVote(format!("item {item_id} is a job posting"))),
        Some(false) => {}
    }

    let open = sqlx::query_as::<_, PositionRow>(
        r#"
        SELECT position_id, user_id, item_id, direction, entry_time,
               entry_upvotes, entry_expected_upvotes, entry_upvote_rate,
               exit_time, exit_upvotes, exit_expected_upvotes, exit_upvote_rate
        FROM positions
        WHERE user_id = ? AND item_id = ? AND exit_time IS NULL
        ORDER BY position_id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(item_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(open) = &open {
        if open.direction == direction.as_i64() {
            debug!(user_id, item_id, position_id = open.position_id, "duplicate vote ignored");
            return Ok(VoteOutcome {
                position_id: Some(open.position_id),
                entry_upvote_rate: open.entry_upvote_rate,
                created: false,
            });
        }
    }

    let latest = store::latest_sample(&mut *tx, item_id)
        .await?
        .ok_or(AppError::ItemNotFound(item_id))?;
    let rate = params.upvote_rate(latest.cumulative_upvotes, latest.cumulative_expected_upvotes);

    if let Some(open) = &open {
        sqlx::query(
            r#"
            UPDATE positions
            SET exit_time = ?, exit_upvotes = ?, exit_expected_upvotes = ?, exit_upvote_rate = ?
            WHERE position_id = ?
            "#,
        )
        .bind(now)
        .bind(latest.cumulative_upvotes)
        .bind(latest.cumulative_expected_upvotes)
        .bind(rate)
        .bind(open.position_id)
        .execute(&mut *tx)
        .await?;
    }

    if direction == Direction::Clear {
        tx.commit().await?;
        return Ok(VoteOutcome { position_id: None, entry_upvote_rate: rate, created: false });
    }

    let position_id = sqlx::query(
        r#"
        INSERT INTO positions (
            user_id, item_id, direction, entry_time,
            entry_upvotes, entry_expected_upvotes, entry_upvote_rate
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(item_id)
    .bind(direction.as_i64())
    .bind(now)
    .bind(latest.cumulative_upvotes)
    .bind(latest.cumulative_expected_upvotes)
    .bind(rate)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;
    Ok(VoteOutcome { position_id: Some(position_id), entry_upvote_rate: rate, created: true })
}

pub async fn user_positions(pool: &sqlx::SqlitePool, user_id: i64) -> Result<Vec<PositionRow>> {
    let rows = sqlx::query_as::<_, PositionRow>(
        r#"
        SELECT position_id, user_id, item_id, direction, entry_time,
               entry_upvotes, entry_expected_upvotes, entry_upvote_rate,
               exit_time, exit_upvotes, exit_expected_upvotes, exit_upvote_rate
        FROM positions
        WHERE user_id = ?
        ORDER BY entry_time DESC, position_id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
