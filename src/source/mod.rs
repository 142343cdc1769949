pub mod hn_api;

pub use hn_api::HnApiSource;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Category, Story};

/// Where ranked id lists and item details come from.
#[async_trait]
pub trait StorySource: Send + Sync {
    /// Ids in listing order. Callers truncate to `MAX_RANK`.
    async fn ranked_ids(&self, category: Category) -> Result<Vec<i64>>;

    /// Details for `ids`, in the same order. `None` marks an item that could
    /// not be fetched or parsed; that item is skipped for this tick.
    async fn item_details(&self, ids: &[i64]) -> Result<Vec<Option<Story>>>;
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::AppError;

    /// Canned listings and items. Tests mutate it between ticks.
    #[derive(Default)]
    pub struct StaticSource {
        pub listings: Mutex<HashMap<Category, Vec<i64>>>,
        pub stories: Mutex<HashMap<i64, Story>>,
        pub fail_listing: Mutex<Option<Category>>,
        /// Listing requests never complete while set.
        pub stall: AtomicBool,
    }

    impl StaticSource {
        pub fn set_listing(&self, category: Category, ids: Vec<i64>) {
            self.listings.lock().unwrap().insert(category, ids);
        }

        pub fn set_story(&self, id: i64, score: i64, submission_time: i64) {
            self.stories.lock().unwrap().insert(
                id,
                Story {
                    id,
                    by: format!("user{id}"),
                    title: format!("Story {id}"),
                    url: format!("https://example.com/{id}"),
                    score,
                    descendants: 0,
                    submission_time,
                    job: false,
                },
            );
        }

        pub fn set_job(&self, id: i64, submission_time: i64) {
            self.set_story(id, 1, submission_time);
            if let Some(story) = self.stories.lock().unwrap().get_mut(&id) {
                story.job = true;
            }
        }
    }

    #[async_trait]
    impl StorySource for StaticSource {
        async fn ranked_ids(&self, category: Category) -> Result<Vec<i64>> {
            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if *self.fail_listing.lock().unwrap() == Some(category) {
                return Err(AppError::StorySource(format!("{category} unavailable")));
            }
            Ok(self.listings.lock().unwrap().get(&category).cloned().unwrap_or_default())
        }

        async fn item_details(&self, ids: &[i64]) -> Result<Vec<Option<Story>>> {
            let stories = self.stories.lock().unwrap();
            Ok(ids.iter().map(|id| stories.get(id).cloned()).collect())
        }
    }
}
