//! Scoring formulas for positions.
//!
//! Every formula shares one signature so variants can be added or dropped
//! by editing [`FORMULAS`].

use std::f64::consts::LN_2;

use crate::error::{AppError, Result};
use crate::model::ModelParams;

pub const DEFAULT_FORMULA: &str = "LogPTS";

/// Upvote state of an item at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub upvotes: i64,
    pub expected_upvotes: f64,
}

impl Snapshot {
    fn rate(&self, params: &ModelParams) -> f64 {
        params.upvote_rate(self.upvotes, self.expected_upvotes)
    }
}

/// Everything a formula may look at. Rates are derived from the counts
/// with whichever params the caller scores under.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub position_id: i64,
    pub direction: i64,
    pub entry: Snapshot,
    pub exit: Option<Snapshot>,
    /// Latest sample for the item.
    pub current: Snapshot,
}

impl PositionSnapshot {
    /// Exit state for closed positions, current state otherwise.
    pub fn final_snapshot(&self) -> Snapshot {
        self.exit.unwrap_or(self.current)
    }

    pub fn sell_price(&self, params: &ModelParams) -> f64 {
        if self.direction == -1 {
            self.entry.rate(params)
        } else {
            self.final_snapshot().rate(params)
        }
    }

    pub fn buy_price(&self, params: &ModelParams) -> f64 {
        if self.direction == 1 {
            self.entry.rate(params)
        } else {
            self.final_snapshot().rate(params)
        }
    }
}

pub type ScoringFormula = fn(&PositionSnapshot, &ModelParams) -> f64;

pub const FORMULAS: &[(&str, ScoringFormula)] = &[
    ("LogPTS", log_peer_truth_serum),
    ("PTS", peer_truth_serum),
    ("InformationGain", information_gain),
    ("InformationGain2", information_gain_2),
    ("InformationGain3", information_gain_3),
    ("InformationGain4", information_gain_4),
    ("InformationGain5", information_gain_5),
    ("InformationGain6", information_gain_6),
    ("InformationGain7", information_gain_7),
    ("InformationGain8", information_gain_8),
];

/// Resolves a formula by name. The empty name selects the default.
pub fn lookup(name: &str) -> Result<(&'static str, ScoringFormula)> {
    let name = if name.is_empty() { DEFAULT_FORMULA } else { name };
    FORMULAS
        .iter()
        .find(|(n, _)| *n == name)
        .copied()
        .ok_or_else(|| AppError::UnknownFormula(name.to_string()))
}

pub fn log_peer_truth_serum(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    (p.sell_price(m) / p.buy_price(m)).log2()
}

pub fn peer_truth_serum(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    p.sell_price(m) / p.buy_price(m) - 1.0
}

// ---------------------------------------------------------------------------
// Information gain variants
//
// None of these handle downvotes: a position with direction -1 scores 0.
// ---------------------------------------------------------------------------

/// Cross-entropy gain of moving the price from `buy` to `post`, weighted by `weight`, in bits.
fn gain(weight: f64, post: f64, buy: f64) -> f64 {
    (weight * (post / buy).ln() + (buy - post)) / LN_2
}

/// Price right after the position's own vote landed.
fn post_entry_price(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    m.upvote_rate(p.entry.upvotes + p.direction, p.entry.expected_upvotes)
}

/// Observed upvote rate since entry, smoothed by adding `prior` to both
/// sides. `None` when no exposure has accrued since entry.
fn post_vote_rate(p: &PositionSnapshot, prior: f64) -> Option<f64> {
    let fin = p.final_snapshot();
    if fin.expected_upvotes == p.entry.expected_upvotes {
        return None;
    }
    Some(
        ((fin.upvotes - p.entry.upvotes) as f64 + prior)
            / (fin.expected_upvotes - p.entry.expected_upvotes + prior),
    )
}

fn smoothed_gain(p: &PositionSnapshot, m: &ModelParams, prior: f64) -> f64 {
    if p.direction == -1 {
        return 0.0;
    }
    match post_vote_rate(p, prior) {
        Some(rate) => gain(rate, post_entry_price(p, m), p.buy_price(m)),
        None => 0.0,
    }
}

pub fn information_gain(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    smoothed_gain(p, m, 0.0)
}

/// Weights by the final price instead of the observed post-vote rate.
pub fn information_gain_2(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    if p.direction == -1 {
        return 0.0;
    }
    let fin = p.final_snapshot();
    let final_rate = m.upvote_rate(fin.upvotes + p.direction, fin.expected_upvotes);
    gain(final_rate, post_entry_price(p, m), p.buy_price(m))
}

pub fn information_gain_3(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    if p.direction == -1 {
        return 0.0;
    }
    let final_rate = p.final_snapshot().rate(m);
    gain(final_rate, final_rate, p.buy_price(m))
}

pub fn information_gain_4(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    smoothed_gain(p, m, 4.0)
}

// Variants 5 to 7 only differ from their parents in how a downvote would
// move the post-entry price, which never matters while downvotes score 0.

pub fn information_gain_5(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    smoothed_gain(p, m, 4.0)
}

pub fn information_gain_6(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    smoothed_gain(p, m, 0.0)
}

pub fn information_gain_7(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    smoothed_gain(p, m, m.prior_weight)
}

/// Information gain shrunk toward 0 by the exposure accrued since entry.
pub fn information_gain_8(p: &PositionSnapshot, m: &ModelParams) -> f64 {
    if p.direction == -1 {
        return 0.0;
    }
    let fin = p.final_snapshot();
    match post_vote_rate(p, 0.0) {
        Some(rate) => {
            gain(rate, post_entry_price(p, m), p.buy_price(m))
                / (fin.expected_upvotes - p.entry.expected_upvotes + m.prior_weight)
        }
        None => 0.0,
    }
}
