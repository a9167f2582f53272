use axum::{extract::State, Json};
use chrono::Local;
use serde::Deserialize;

use crate::core::planner;
use crate::error::AppResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RollRequest {
    pub mood: Option<i64>,
}

pub async fn can_roll(State(state): State<AppState>) -> AppResult<Json<planner::RollAvailability>> {
    let availability = planner::can_roll(&state.db, Local::now().naive_local()).await?;
    Ok(Json(availability))
}

pub async fn roll(
    State(state): State<AppState>,
    body: Option<Json<RollRequest>>,
) -> AppResult<Json<planner::RollOutcome>> {
    let mood = body.and_then(|Json(b)| b.mood);
    let outcome = planner::roll(&state.db, mood, Local::now().naive_local()).await?;
    Ok(Json(outcome))
}
