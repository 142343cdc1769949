use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_FATIGUE_FACTOR, DEFAULT_PRIOR_WEIGHT};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    pub fatigue_factor: f64,
    pub prior_weight: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            fatigue_factor: DEFAULT_FATIGUE_FACTOR,
            prior_weight: DEFAULT_PRIOR_WEIGHT,
        }
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("fatigueFactor", self.fatigue_factor), ("priorWeight", self.prior_weight)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::InvalidParams(format!("{name} must be positive, got {v}")));
            }
        }
        Ok(())
    }

    /// Damped ratio of actual to expected upvotes.
    ///
    /// Expected upvotes pass through `(1 - e^{-f·e}) / f`, which saturates at
    /// `1/f` so very old items keep a finite, non-zero rate.
    pub fn upvote_rate(&self, upvotes: i64, expected_upvotes: f64) -> f64 {
        let f = self.fatigue_factor;
        let w = self.prior_weight;
        let exposure = -(-f * expected_upvotes).exp_m1() / f;
        (upvotes as f64 + w) / (exposure + w)
    }
}

/// Per-query overrides for exploratory scoring.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalModelParams {
    pub fatigue_factor: Option<f64>,
    pub prior_weight: Option<f64>,
}

impl OptionalModelParams {
    pub fn with_defaults(&self, defaults: &ModelParams) -> Result<ModelParams> {
        let params = ModelParams {
            fatigue_factor: self.fatigue_factor.unwrap_or(defaults.fatigue_factor),
            prior_weight: self.prior_weight.unwrap_or(defaults.prior_weight),
        };
        params.validate()?;
        Ok(params)
    }
}
