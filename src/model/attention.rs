//! Expected share of sitewide upvotes attracted by a (category, rank) slot.
//!
//! Attention falls off as a power law in rank-on-page, with an extra drop for
//! each page a reader has to click through. The constants below were fitted
//! offline against three pages of [`PAGE_SIZE`] stories per category.

use crate::config::{MAX_RANK, PAGE_SIZE};
use crate::error::{AppError, Result};
use crate::types::{Category, CATEGORY_COUNT};

pub const PAGES: usize = MAX_RANK / PAGE_SIZE;

/// Regression constants for one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryCoefficients {
    pub category: f64,
    pub page: f64,
    /// Slope of log-attention in log(rank on page), one per page.
    pub rank: [f64; PAGES],
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttentionModel {
    table: [CategoryCoefficients; CATEGORY_COUNT],
}

impl Default for AttentionModel {
    fn default() -> Self {
        // Indexed by Category::index(). The best/ask rank slopes are flattened
        // by hand so the share keeps falling across page boundaries.
        Self {
            table: [
                CategoryCoefficients {
                    category: -2.886938,
                    page: -3.316492,
                    rank: [-0.5193376, -0.2596688, -0.1731125],
                },
                CategoryCoefficients {
                    category: -5.856364,
                    page: -2.564690,
                    rank: [-0.3937709, -0.1968855, -0.1312570],
                },
                CategoryCoefficients {
                    category: -7.175409,
                    page: -1.280364,
                    // fitted: [-0.3717084, -0.1858542, -0.1239028]
                    rank: [-0.25, -0.14, -0.09],
                },
                CategoryCoefficients {
                    category: -5.316879,
                    page: -5.469948,
                    // fitted: [-1.2944215, -0.6472108, -0.4314738]
                    rank: [-1.05, -0.60, -0.40],
                },
                CategoryCoefficients {
                    category: -6.292276,
                    page: -5.912105,
                    rank: [-1.1996512, -0.5998256, -0.3998837],
                },
            ],
        }
    }
}

impl AttentionModel {
    pub fn coefficients(&self, category: Category) -> &CategoryCoefficients {
        &self.table[category.index()]
    }

    /// Fraction of sitewide upvotes expected to land on `rank` (1-based) in
    /// `category`. Ranks outside `1..=MAX_RANK` get no attention.
    pub fn expected_share(&self, category: Category, rank: u32) -> f64 {
        let rank = rank as usize;
        if rank == 0 || rank > MAX_RANK {
            return 0.0;
        }
        let page = (rank - 1) / PAGE_SIZE;
        let rank_on_page = ((rank - 1) % PAGE_SIZE + 1) as f64;
        let c = self.coefficients(category);

        (c.category + c.page * ((page + 1) as f64).ln() + c.rank[page] * rank_on_page.ln()).exp()
    }

    pub fn delta_expected_upvotes(&self, category: Category, rank: u32, sitewide_upvotes: i64) -> f64 {
        sitewide_upvotes as f64 * self.expected_share(category, rank)
    }

    /// Rejects a table whose share is not strictly decreasing over `1..=MAX_RANK`.
    pub fn validate(&self) -> Result<()> {
        for category in Category::ALL {
            let mut prev = f64::INFINITY;
            for rank in 1..=MAX_RANK as u32 {
                let share = self.expected_share(category, rank);
                if !(share.is_finite() && share > 0.0 && share < prev) {
                    return Err(AppError::Config(format!(
                        "attention coefficients for {category} are not strictly decreasing at rank {rank}"
                    )));
                }
                prev = share;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_strictly_decreasing() {
        AttentionModel::default().validate().unwrap();
    }

    #[test]
    fn share_is_decreasing_across_page_boundaries() {
        let model = AttentionModel::default();
        for category in Category::ALL {
            for boundary in [30u32, 60] {
                assert!(
                    model.expected_share(category, boundary) > model.expected_share(category, boundary + 1),
                    "{category} at {boundary}"
                );
            }
        }
    }

    #[test]
    fn first_top_slot_uses_category_coefficient_only() {
        let model = AttentionModel::default();
        let expected = (-2.886938f64).exp();
        assert!((model.expected_share(Category::Top, 1) - expected).abs() < 1e-12);
    }

    #[test]
    fn unranked_slots_get_no_attention() {
        let model = AttentionModel::default();
        assert_eq!(model.expected_share(Category::New, 0), 0.0);
        assert_eq!(model.expected_share(Category::New, 91), 0.0);
        assert_eq!(model.delta_expected_upvotes(Category::New, 91, 1000), 0.0);
    }

    #[test]
    fn delta_scales_with_sitewide_upvotes() {
        let model = AttentionModel::default();
        let share = model.expected_share(Category::Show, 7);
        assert!((model.delta_expected_upvotes(Category::Show, 7, 250) - 250.0 * share).abs() < 1e-12);
    }

    #[test]
    fn fitted_best_and_ask_slopes_rise_at_page_two() {
        let fitted = [
            (Category::Best, [-0.3717084, -0.1858542, -0.1239028]),
            (Category::Ask, [-1.2944215, -0.6472108, -0.4314738]),
        ];
        for (category, rank) in fitted {
            let mut table = AttentionModel::default().table;
            table[category.index()].rank = rank;
            let model = AttentionModel { table };
            assert!(model.expected_share(category, 31) > model.expected_share(category, 30), "{category}");
            assert!(model.validate().is_err());
        }
    }

    #[test]
    fn validate_catches_rising_table() {
        let mut table = AttentionModel::default().table;
        table[Category::Ask.index()].rank = [-1.05, -0.0, -0.40];
        let err = AttentionModel { table }.validate().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
