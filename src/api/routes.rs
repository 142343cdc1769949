use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::config::CRAWL_STALE_SECS;
use crate::db::models::PositionRow;
use crate::db::store;
use crate::error::AppError;
use crate::model::{ModelConfig, OptionalModelParams};
use crate::positions::{history, record_vote, user_positions, UserScore, VoteOutcome};
use crate::types::now_secs;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub model: Arc<ModelConfig>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/vote", post(post_vote))
        .route("/users/:user_id/score", get(get_user_score))
        .route("/users/:user_id/positions", get(get_user_positions))
        .route("/stories", get(get_stories))
        .route("/health", get(get_health))
        .route("/health/crawl", get(get_crawl_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct VoteRequest {
    #[serde(rename = "userID")]
    pub user_id: i64,
    #[serde(rename = "itemID")]
    pub item_id: i64,
    pub direction: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreQuery {
    pub formula: Option<String>,
    pub fatigue_factor: Option<f64>,
    pub prior_weight: Option<f64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryResponse {
    pub id: i64,
    pub qn_rank: Option<i64>,
    pub raw_rank: Option<i64>,
    pub top_rank: Option<i64>,
    pub score: i64,
    pub upvote_rate: f64,
    pub penalty: f64,
    pub resubmitted: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn post_vote(
    State(state): State<ApiState>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteOutcome>, AppError> {
    let outcome = record_vote(
        &state.pool,
        &state.model.params,
        req.user_id,
        req.item_id,
        req.direction,
        now_secs(),
    )
    .await?;
    Ok(Json(outcome))
}

async fn get_user_score(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
    Query(q): Query<ScoreQuery>,
) -> Result<Json<UserScore>, AppError> {
    let params = OptionalModelParams { fatigue_factor: q.fatigue_factor, prior_weight: q.prior_weight }
        .with_defaults(&state.model.params)?;
    let score = history::score_history(&state.pool, user_id, q.formula.as_deref().unwrap_or(""), &params).await?;
    Ok(Json(score))
}

async fn get_user_positions(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<PositionRow>>, AppError> {
    Ok(Json(user_positions(&state.pool, user_id).await?))
}

async fn get_stories(State(state): State<ApiState>) -> Result<Json<Vec<StoryResponse>>, AppError> {
    let params = state.model.params;
    let stories = store::latest_ranking(&state.pool)
        .await?
        .into_iter()
        .map(|s| StoryResponse {
            id: s.id,
            qn_rank: s.qn_rank,
            raw_rank: s.raw_rank,
            top_rank: s.top_rank,
            score: s.score,
            upvote_rate: params.upvote_rate(s.cumulative_upvotes, s.cumulative_expected_upvotes),
            penalty: s.penalty,
            resubmitted: s.resubmitted,
        })
        .collect();
    Ok(Json(stories))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_crawl_health(State(state): State<ApiState>) -> (StatusCode, String) {
    crawl_health(state.health.last_crawl_at(), now_secs())
}

fn crawl_health(last_crawl_at: i64, now: i64) -> (StatusCode, String) {
    let age = now - last_crawl_at;
    if last_crawl_at == 0 || age > CRAWL_STALE_SECS {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("last successful crawl was {age}s ago"))
    } else {
        (StatusCode::OK, "ok".to_string())
    }
}
