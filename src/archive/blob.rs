//! Self-describing JSON snapshot of one item's full time series.

use serde::{Deserialize, Serialize};

use crate::config::MAX_RANK;
use crate::db::models::{ItemRow, SampleRow};
use crate::db::store;
use crate::error::{AppError, Result};
use crate::model::ModelParams;
use crate::types::Category;

pub const CONTENT_TYPE: &str = "application/json";

/// Plotted in place of a missing rank so absent points sit below the chart.
const ABSENT_RANK: i64 = MAX_RANK as i64 + 1;

/// `[ageHours, qnRank, top, new, best, ask, show]`
pub type RanksRow = (f64, i64, i64, i64, i64, i64, i64);
/// `[ageHours, cumulativeUpvotes, cumulativeExpectedUpvotes, upvoteRate]`
pub type UpvotesRow = (f64, i64, f64, f64);
/// `[ageHours, penalty]`
pub type PenaltyRow = (f64, f64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveData {
    #[serde(rename = "ID")]
    pub id: i64,
    pub by: String,
    pub title: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub original_submission_time: i64,
    pub submission_time: i64,
    pub max_sample_time: i64,
    pub score: i64,
    pub comments: i64,
    pub cumulative_upvotes: i64,
    pub cumulative_expected_upvotes: f64,
    pub ranks_plot_data: Vec<RanksRow>,
    pub upvotes_plot_data: Vec<UpvotesRow>,
    pub penalty_plot_data: Vec<PenaltyRow>,
}

/// `{id}.json` for an item's first series; a series recorded after the item
/// resurfaced gets the generation as a suffix.
pub fn archive_key(item_id: i64, generation: i64) -> String {
    match generation {
        0 => format!("{item_id}.json"),
        g => format!("{item_id}.{g}.json"),
    }
}

/// `samples` must be non-empty and ordered by sample time.
pub fn build(item: &ItemRow, samples: &[SampleRow], params: &ModelParams) -> Option<ArchiveData> {
    let last = samples.last()?;

    let age_hours = |s: &SampleRow| (s.sample_time - s.submission_time) as f64 / 3600.0;
    let plot_rank = |r: Option<i64>| r.filter(|&r| r <= MAX_RANK as i64).unwrap_or(ABSENT_RANK);

    let ranks_plot_data = samples
        .iter()
        .map(|s| {
            let rank = |c: Category| plot_rank(s.rank(c).map(i64::from));
            (
                age_hours(s),
                plot_rank(s.qn_rank),
                rank(Category::Top),
                rank(Category::New),
                rank(Category::Best),
                rank(Category::Ask),
                rank(Category::Show),
            )
        })
        .collect();

    let upvotes_plot_data = samples
        .iter()
        .map(|s| {
            (
                age_hours(s),
                s.cumulative_upvotes,
                s.cumulative_expected_upvotes,
                params.upvote_rate(s.cumulative_upvotes, s.cumulative_expected_upvotes),
            )
        })
        .collect();

    let penalty_plot_data = samples.iter().map(|s| (age_hours(s), s.penalty)).collect();

    Some(ArchiveData {
        id: item.id,
        by: item.by.clone(),
        title: item.title.clone(),
        url: item.url.clone(),
        original_submission_time: item.timestamp,
        submission_time: last.submission_time,
        max_sample_time: last.sample_time,
        score: last.score,
        comments: last.descendants,
        cumulative_upvotes: last.cumulative_upvotes,
        cumulative_expected_upvotes: last.cumulative_expected_upvotes,
        ranks_plot_data,
        upvotes_plot_data,
        penalty_plot_data,
    })
}

/// Reads the item's time series from the store and serializes it.
pub async fn generate(pool: &sqlx::SqlitePool, params: &ModelParams, item_id: i64) -> Result<Vec<u8>> {
    let item = store::item(pool, item_id)
        .await?
        .ok_or(AppError::ItemNotFound(item_id))?;
    let samples = store::item_samples(pool, item_id).await?;
    let data = build(&item, &samples, params)
        .ok_or_else(|| AppError::Archive(format!("item {item_id} has no samples")))?;
    Ok(serde_json::to_vec(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> ItemRow {
        ItemRow {
            id: 12,
            by: "pg".to_string(),
            title: "Show HN: thing".to_string(),
            url: "https://example.com".to_string(),
            timestamp: 0,
            job: false,
            archived: false,
            archive_generation: 0,
        }
    }

    fn sample(sample_time: i64, top_rank: Option<i64>, qn_rank: Option<i64>) -> SampleRow {
        SampleRow {
            id: 12,
            score: 5,
            descendants: 2,
            submission_time: 0,
            sample_time,
            top_rank,
            new_rank: None,
            best_rank: None,
            ask_rank: None,
            show_rank: Some(3),
            cumulative_upvotes: 4,
            cumulative_expected_upvotes: 2.5,
            raw_rank: None,
            qn_rank,
            penalty: 0.25,
            resubmitted: false,
        }
    }

    #[test]
    fn absent_ranks_plot_below_the_chart() {
        let data = build(&item(), &[sample(3600, Some(7), None)], &ModelParams::default()).unwrap();
        assert_eq!(data.ranks_plot_data, vec![(1.0, 91, 7, 91, 91, 91, 3)]);
        assert_eq!(data.penalty_plot_data, vec![(1.0, 0.25)]);
    }

    #[test]
    fn uses_last_sample_for_summary_fields() {
        let samples = [sample(60, Some(1), Some(2)), sample(7200, None, Some(140))];
        let data = build(&item(), &samples, &ModelParams::default()).unwrap();
        assert_eq!(data.max_sample_time, 7200);
        assert_eq!(data.ranks_plot_data[1].1, 91);
        assert_eq!(data.upvotes_plot_data.len(), 2);
    }

    #[test]
    fn json_uses_plot_field_names() {
        let data = build(&item(), &[sample(60, None, None)], &ModelParams::default()).unwrap();
        let v = serde_json::to_value(&data).unwrap();
        for field in ["RanksPlotData", "UpvotesPlotData", "PenaltyPlotData", "MaxSampleTime", "SubmissionTime", "ID", "URL"] {
            assert!(v.get(field).is_some(), "{field}");
        }
        assert!(v["RanksPlotData"][0].is_array());
    }

    #[test]
    fn later_generations_get_their_own_key() {
        assert_eq!(archive_key(12, 0), "12.json");
        assert_eq!(archive_key(12, 2), "12.2.json");
    }

    #[test]
    fn no_samples_no_blob() {
        assert!(build(&item(), &[], &ModelParams::default()).is_none());
    }
}
