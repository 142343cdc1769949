use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ITEM_FETCH_CONCURRENCY;
use crate::error::{AppError, Result};
use crate::source::StorySource;
use crate::types::{Category, Story};

/// Story source backed by the public Hacker News Firebase API.
pub struct HnApiSource {
    client: reqwest::Client,
    base_url: String,
}

impl HnApiSource {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { client, base_url })
    }

    async fn fetch_item(&self, id: i64) -> Result<Option<Story>> {
        let url = format!("{}/item/{id}.json", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        // The API answers `null` for ids it does not know.
        let raw: Option<RawItem> = resp.json().await?;
        Ok(raw.and_then(parse_item))
    }
}

fn listing_path(category: Category) -> &'static str {
    match category {
        Category::Top => "topstories",
        Category::New => "newstories",
        Category::Best => "beststories",
        Category::Ask => "askstories",
        Category::Show => "showstories",
    }
}

#[async_trait]
impl StorySource for HnApiSource {
    async fn ranked_ids(&self, category: Category) -> Result<Vec<i64>> {
        let url = format!("{}/{}.json", self.base_url, listing_path(category));
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::StorySource(format!(
                "{category} listing returned {}",
                resp.status()
            )));
        }
        let ids: Vec<i64> = resp.json().await?;
        debug!(%category, count = ids.len(), "fetched listing");
        Ok(ids)
    }

    async fn item_details(&self, ids: &[i64]) -> Result<Vec<Option<Story>>> {
        let items = stream::iter(ids.iter().copied())
            .map(|id| async move {
                match self.fetch_item(id).await {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(item_id = id, "item fetch failed: {e}");
                        None
                    }
                }
            })
            .buffered(ITEM_FETCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        Ok(items)
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: i64,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    descendants: Option<i64>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    dead: bool,
}

/// Deleted or dead items and items without a submission time are unusable.
fn parse_item(raw: RawItem) -> Option<Story> {
    if raw.id <= 0 || raw.deleted || raw.dead {
        return None;
    }
    Some(Story {
        id: raw.id,
        by: raw.by.unwrap_or_default(),
        title: raw.title.unwrap_or_default(),
        url: raw.url.unwrap_or_default(),
        score: raw.score.unwrap_or(0),
        descendants: raw.descendants.unwrap_or(0),
        submission_time: raw.time?,
        job: raw.kind.as_deref() == Some("job"),
    })
}
