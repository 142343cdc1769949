use serde::Serialize;
use tracing::error;

use crate::db::models::PositionRow;
use crate::error::{AppError, Result};
use crate::model::ModelParams;
use crate::positions::formula::{self, PositionSnapshot, ScoringFormula, Snapshot};

/// Formula values are reported in points.
pub const POINTS_PER_UNIT: f64 = 100.0;

#[derive(Debug, Clone, sqlx::FromRow)]
struct HistoryRow {
    #[sqlx(flatten)]
    position: PositionRow,
    current_upvotes: Option<i64>,
    current_expected_upvotes: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredPosition {
    #[serde(flatten)]
    pub position: PositionRow,
    pub score: f64,
    /// This position's score plus everything entered before it.
    pub running_score: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScore {
    pub user_id: i64,
    pub formula: &'static str,
    pub params: ModelParams,
    pub score: f64,
    pub positions: Vec<ScoredPosition>,
}

/// Scores every position the user ever held, newest first.
pub async fn score_history(
    pool: &sqlx::SqlitePool,
    user_id: i64,
    formula_name: &str,
    params: &ModelParams,
) -> Result<UserScore> {
    let (name, formula) = formula::lookup(formula_name)?;

    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT p.position_id, p.user_id, p.item_id, p.direction, p.entry_time,
               p.entry_upvotes, p.entry_expected_upvotes, p.entry_upvote_rate,
               p.exit_time, p.exit_upvotes, p.exit_expected_upvotes, p.exit_upvote_rate,
               s.cumulative_upvotes AS current_upvotes,
               s.cumulative_expected_upvotes AS current_expected_upvotes
        FROM positions p
        LEFT JOIN samples s
          ON s.id = p.item_id
         AND s.sample_time = (SELECT MAX(sample_time) FROM samples WHERE id = p.item_id)
        WHERE p.user_id = ?
        ORDER BY p.entry_time DESC, p.position_id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let snapshots = rows.into_iter().map(|r| {
        let snap = snapshot(&r);
        (r.position, snap)
    });
    let (score, positions) = score_positions(snapshots, name, formula, params)?;

    Ok(UserScore { user_id, formula: name, params: *params, score, positions })
}

fn snapshot(r: &HistoryRow) -> PositionSnapshot {
    let p = &r.position;
    let entry = Snapshot { upvotes: p.entry_upvotes, expected_upvotes: p.entry_expected_upvotes };
    let exit = match (p.exit_upvotes, p.exit_expected_upvotes) {
        (Some(upvotes), Some(expected_upvotes)) => Some(Snapshot { upvotes, expected_upvotes }),
        _ => None,
    };
    // Items lose their samples once archived; by then their positions are closed.
    let current = match (r.current_upvotes, r.current_expected_upvotes) {
        (Some(upvotes), Some(expected_upvotes)) => Snapshot { upvotes, expected_upvotes },
        _ => exit.unwrap_or(entry),
    };
    PositionSnapshot { position_id: p.position_id, direction: p.direction, entry, exit, current }
}

/// `positions` must be ordered newest first.
pub fn score_positions(
    positions: impl IntoIterator<Item = (PositionRow, PositionSnapshot)>,
    name: &str,
    formula: ScoringFormula,
    params: &ModelParams,
) -> Result<(f64, Vec<ScoredPosition>)> {
    let mut scored = Vec::new();
    for (row, snap) in positions {
        let score = formula(&snap, params) * POINTS_PER_UNIT;
        if !score.is_finite() {
            error!(formula = name, position_id = row.position_id, ?snap, ?params, "non-finite score");
            return Err(AppError::NonFiniteScore { formula: name.to_string(), position_id: row.position_id });
        }
        scored.push((row, score));
    }

    let total: f64 = scored.iter().map(|(_, s)| s).sum();
    let n = scored.len();
    let mut newer = 0.0;
    let positions = scored
        .into_iter()
        .enumerate()
        .map(|(i, (position, score))| {
            let running_score = total - newer;
            newer += score;
            ScoredPosition { position, score, running_score, label: alpha_label(n - i - 1) }
        })
        .collect();

    Ok((total, positions))
}

/// Bijective base-26 label: 0 → A, 25 → Z, 26 → AA, 27 → AB.
pub fn alpha_label(n: usize) -> String {
    let mut n = n + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}
