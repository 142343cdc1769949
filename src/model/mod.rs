pub mod attention;
pub mod upvote_rate;

pub use attention::AttentionModel;
pub use upvote_rate::{ModelParams, OptionalModelParams};

use crate::config::{Config, DEFAULT_GRAVITY};
use crate::error::{AppError, Result};

/// Immutable model configuration, built once at startup and shared as `Arc<ModelConfig>`.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Canonical params. Persisted entry rates are always computed with these.
    pub params: ModelParams,
    /// Time-decay exponent used by rank recompute.
    pub gravity: f64,
    pub attention: AttentionModel,
}

impl ModelConfig {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let model = Self {
            params: ModelParams {
                fatigue_factor: cfg.fatigue_factor,
                prior_weight: cfg.prior_weight,
            },
            gravity: cfg.gravity,
            attention: AttentionModel::default(),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if !(self.gravity.is_finite() && self.gravity > 0.0) {
            return Err(AppError::Config(format!("GRAVITY must be positive, got {}", self.gravity)));
        }
        self.attention.validate()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            params: ModelParams::default(),
            gravity: DEFAULT_GRAVITY,
            attention: AttentionModel::default(),
        }
    }
}
