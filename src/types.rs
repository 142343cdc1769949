use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

pub const CATEGORY_COUNT: usize = 5;

/// Listing an item can be ranked under. Discriminants index into [`Ranks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Top = 0,
    New = 1,
    Best = 2,
    Ask = 3,
    Show = 4,
}

impl Category {
    pub const ALL: [Category; CATEGORY_COUNT] = [
        Category::Top,
        Category::New,
        Category::Best,
        Category::Ask,
        Category::Show,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Top => "top",
            Category::New => "new",
            Category::Best => "best",
            Category::Ask => "ask",
            Category::Show => "show",
        };
        write!(f, "{s}")
    }
}

/// 1-based rank per category; `None` when the item is not listed there.
pub type Ranks = [Option<u32>; CATEGORY_COUNT];

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

/// Item details as reported by the story source.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub id: i64,
    pub by: String,
    pub title: String,
    pub url: String,
    pub score: i64,
    pub descendants: i64,
    pub submission_time: i64,
    /// Job postings hold a listing slot but take no votes.
    pub job: bool,
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    /// Withdraws the current vote without taking the other side.
    Clear,
}

impl Direction {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Direction::Up),
            -1 => Some(Direction::Down),
            0 => Some(Direction::Clear),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
            Direction::Clear => 0,
        }
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_indices_are_dense() {
        for (i, c) in Category::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[test]
    fn direction_round_trips_through_i64() {
        for v in [-1, 0, 1] {
            assert_eq!(Direction::from_i64(v).map(Direction::as_i64), Some(v));
        }
        assert_eq!(Direction::from_i64(2), None);
        assert_eq!(Direction::from_i64(-2), None);
    }
}
