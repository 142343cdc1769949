use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::MAX_RANK;
use crate::db::models::LastSeenRow;
use crate::db::store::{self, NewSample};
use crate::error::{AppError, Result};
use crate::model::ModelConfig;
use crate::scorer::rank_recompute;
use crate::source::StorySource;
use crate::types::{Category, Ranks, Story, CATEGORY_COUNT};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestStats {
    /// Samples written this tick.
    pub items: usize,
    /// Ranked ids whose details could not be fetched.
    pub skipped: usize,
    pub sitewide_upvotes: i64,
}

/// Samples the story source and appends one tick of the time series.
pub struct Crawler {
    pool: sqlx::SqlitePool,
    source: Arc<dyn StorySource>,
    model: Arc<ModelConfig>,
}

impl Crawler {
    pub fn new(pool: sqlx::SqlitePool, source: Arc<dyn StorySource>, model: Arc<ModelConfig>) -> Self {
        Self { pool, source, model }
    }

    /// Ingest followed by rank recompute. The caller bounds it with the tick deadline.
    pub async fn crawl(&self, sample_time: i64) -> Result<IngestStats> {
        let started = Instant::now();
        let stats = self.ingest_once(sample_time).await?;
        let ranked = rank_recompute::recompute(&self.pool, &self.model, sample_time).await?;
        info!(
            items = stats.items,
            skipped = stats.skipped,
            sitewide_upvotes = stats.sitewide_upvotes,
            ranked,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "crawl complete"
        );
        Ok(stats)
    }

    /// One sampling pass. All samples for the tick commit together; a story
    /// source failure aborts the pass before anything is written.
    pub async fn ingest_once(&self, sample_time: i64) -> Result<IngestStats> {
        let (order, ranks) = self.collect_ranks().await?;
        let details = self.source.item_details(&order).await?;

        let mut stats = IngestStats::default();
        let mut seen: Vec<(Story, Ranks, Option<LastSeenRow>, i64)> = Vec::with_capacity(order.len());

        let mut tx = self.pool.begin().await?;

        if let Some(last) = store::last_sample_time(&mut *tx).await? {
            if sample_time <= last {
                return Err(AppError::StaleSampleTime { sample_time, last_sample_time: last });
            }
        }

        for (requested, story) in order.iter().zip(details) {
            let Some(story) = story else {
                stats.skipped += 1;
                continue;
            };
            // Sentinel or mismatched detail record.
            if story.id <= 0 || story.id != *requested {
                stats.skipped += 1;
                continue;
            }
            let Some(item_ranks) = ranks.get(&story.id).copied() else {
                continue;
            };

            let last = store::last_seen(&mut *tx, story.id).await?;
            let delta = upvote_delta(&story, last.as_ref());
            stats.sitewide_upvotes += delta;
            seen.push((story, item_ranks, last, delta));
        }

        for (story, item_ranks, last, delta) in &seen {
            let delta_expected = self.expected_upvotes_delta(item_ranks, stats.sitewide_upvotes);
            let (prev_upvotes, prev_expected) = last
                .as_ref()
                .map_or((0, 0.0), |l| (l.cumulative_upvotes, l.cumulative_expected_upvotes));

            store::upsert_item(&mut *tx, story).await?;
            store::insert_sample(
                &mut *tx,
                &NewSample {
                    story,
                    sample_time,
                    ranks: *item_ranks,
                    cumulative_upvotes: prev_upvotes + delta,
                    cumulative_expected_upvotes: prev_expected + delta_expected,
                },
            )
            .await?;
        }

        tx.commit().await?;
        stats.items = seen.len();
        Ok(stats)
    }

    /// Ranked ids for every category, truncated to `MAX_RANK`. Returns the
    /// union of ids in first-seen order alongside each id's ranks.
    async fn collect_ranks(&self) -> Result<(Vec<i64>, HashMap<i64, Ranks>)> {
        let mut order = Vec::new();
        let mut ranks: HashMap<i64, Ranks> = HashMap::new();

        for category in Category::ALL {
            let ids = self.source.ranked_ids(category).await?;
            debug!(%category, listed = ids.len(), "ranked ids");
            for (i, id) in ids.into_iter().take(MAX_RANK).enumerate() {
                if id <= 0 {
                    continue;
                }
                let entry = ranks.entry(id).or_insert_with(|| {
                    order.push(id);
                    [None; CATEGORY_COUNT]
                });
                // First listing position wins if an id repeats.
                if entry[category.index()].is_none() {
                    entry[category.index()] = Some(i as u32 + 1);
                }
            }
        }
        Ok((order, ranks))
    }

    fn expected_upvotes_delta(&self, ranks: &Ranks, sitewide_upvotes: i64) -> f64 {
        Category::ALL
            .iter()
            .filter_map(|&c| {
                ranks[c.index()].map(|r| self.model.attention.delta_expected_upvotes(c, r, sitewide_upvotes))
            })
            .sum()
    }
}

/// Score gained since the item's last sample. Score drops (retracted votes,
/// moderation) count as zero so cumulative upvotes never decrease.
fn upvote_delta(story: &Story, last: Option<&LastSeenRow>) -> i64 {
    match last {
        Some(l) => (story.score - l.score).max(0),
        None => 0,
    }
}
