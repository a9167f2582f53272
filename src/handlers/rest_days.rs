use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;

use crate::error::{AppError, AppResult};
use crate::models::rest_day::{CreateRestDayRequest, RestDay};
use crate::AppState;

pub async fn list_rest_days(State(state): State<AppState>) -> AppResult<Json<Vec<RestDay>>> {
    let days = sqlx::query_as::<_, RestDay>("SELECT * FROM rest_days ORDER BY date DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(days))
}

pub async fn create_rest_day(
    State(state): State<AppState>,
    Json(body): Json<CreateRestDayRequest>,
) -> AppResult<Json<RestDay>> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rest_days WHERE date = ?1")
        .bind(body.date)
        .fetch_one(&state.db)
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict(format!("{} is already a rest day", body.date)));
    }

    let day = sqlx::query_as::<_, RestDay>(
        "INSERT INTO rest_days (date, description) VALUES (?1, ?2) RETURNING *",
    )
    .bind(body.date)
    .bind(&body.description)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(day))
}

pub async fn delete_rest_day(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> AppResult<Json<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM rest_days WHERE date = ?1")
        .bind(date)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("{date} is not a rest day")));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
