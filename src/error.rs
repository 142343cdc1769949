use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The tick (or archive pass) ran past its deadline and was abandoned.
    #[error("deadline exceeded")]
    DeadlineExceeded(#[from] tokio::time::error::Elapsed),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Story source error: {0}")]
    StorySource(String),

    #[error("Archive store error: {0}")]
    Archive(String),

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Invalid model parameters: {0}")]
    InvalidParams(String),

    #[error("Item {0} not found")]
    ItemNotFound(i64),

    #[error("Unknown scoring formula '{0}'")]
    UnknownFormula(String),

    #[error("Formula {formula} produced a non-finite score for position {position_id}")]
    NonFiniteScore { formula: String, position_id: i64 },

    #[error("sample time {sample_time} is not after the last crawl at {last_sample_time}")]
    StaleSampleTime { sample_time: i64, last_sample_time: i64 },
}

impl AppError {
    pub fn is_deadline(&self) -> bool {
        matches!(self, AppError::DeadlineExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::InvalidVote(_) | AppError::InvalidParams(_) | AppError::UnknownFormula(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::ItemNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
