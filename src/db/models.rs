use serde::Serialize;

use crate::types::{Category, Ranks, CATEGORY_COUNT};

/// A row from `samples`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRow {
    pub id: i64,
    pub score: i64,
    pub descendants: i64,
    pub submission_time: i64,
    pub sample_time: i64,
    pub top_rank: Option<i64>,
    pub new_rank: Option<i64>,
    pub best_rank: Option<i64>,
    pub ask_rank: Option<i64>,
    pub show_rank: Option<i64>,
    pub cumulative_upvotes: i64,
    pub cumulative_expected_upvotes: f64,
    pub raw_rank: Option<i64>,
    pub qn_rank: Option<i64>,
    pub penalty: f64,
    pub resubmitted: bool,
}

impl SampleRow {
    pub fn ranks(&self) -> Ranks {
        let raw = [self.top_rank, self.new_rank, self.best_rank, self.ask_rank, self.show_rank];
        let mut ranks = [None; CATEGORY_COUNT];
        for (slot, r) in ranks.iter_mut().zip(raw) {
            *slot = r.and_then(|r| u32::try_from(r).ok());
        }
        ranks
    }

    pub fn rank(&self, category: Category) -> Option<u32> {
        self.ranks()[category.index()]
    }
}

/// Prior state needed to compute an item's deltas for the next tick.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LastSeenRow {
    pub score: i64,
    pub cumulative_upvotes: i64,
    pub cumulative_expected_upvotes: f64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRow {
    pub id: i64,
    pub by: String,
    pub title: String,
    pub url: String,
    pub timestamp: i64,
    pub job: bool,
    pub archived: bool,
    pub archive_generation: i64,
}

/// An item due for archival. `generation` counts earlier archive passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct ArchiveCandidate {
    pub id: i64,
    pub generation: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRow {
    pub position_id: i64,
    pub user_id: i64,
    pub item_id: i64,
    pub direction: i64,
    pub entry_time: i64,
    pub entry_upvotes: i64,
    pub entry_expected_upvotes: f64,
    pub entry_upvote_rate: f64,
    pub exit_time: Option<i64>,
    pub exit_upvotes: Option<i64>,
    pub exit_expected_upvotes: Option<f64>,
    pub exit_upvote_rate: Option<f64>,
}
