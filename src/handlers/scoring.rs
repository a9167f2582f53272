use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{dates, scoring};
use crate::error::{AppError, AppResult};
use crate::models::ledger::DayLedger;
use crate::models::settings::Settings;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct PointsSummary {
    pub total_points: i64,
    pub date: NaiveDate,
    pub points_earned: i64,
    pub points_penalty: i64,
    pub daily_total: i64,
    pub penalty_streak: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectionQuery {
    pub target_date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct Projection {
    pub target_date: NaiveDate,
    pub current_points: i64,
    pub daily_average: f64,
    pub days_remaining: i64,
    pub projected_points: i64,
}

pub async fn current_points(State(state): State<AppState>) -> AppResult<Json<PointsSummary>> {
    let mut conn = state.db.acquire().await?;
    let settings = Settings::load(&mut conn).await?;
    let today = dates::effective_today(&settings)?;

    let total = scoring::total_points(&mut conn).await?;
    let ledger = scoring::fetch_ledger(&mut conn, today).await?;

    let (earned, penalty, daily, streak) = ledger
        .map(|l| (l.points_earned, l.points_penalty, l.daily_total, l.penalty_streak))
        .unwrap_or((0, 0, 0, 0));

    Ok(Json(PointsSummary {
        total_points: total,
        date: today,
        points_earned: earned,
        points_penalty: penalty,
        daily_total: daily,
        penalty_streak: streak,
    }))
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<DayLedger>>> {
    let days = query.days.unwrap_or(30).clamp(1, 365);
    let rows = sqlx::query_as::<_, DayLedger>(
        "SELECT * FROM day_ledger ORDER BY date DESC LIMIT ?1",
    )
    .bind(days)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

/// Straight-line projection: the trailing 30-day mean of daily totals
/// carried forward to the target date.
pub async fn projection(
    State(state): State<AppState>,
    Query(query): Query<ProjectionQuery>,
) -> AppResult<Json<Projection>> {
    let mut conn = state.db.acquire().await?;
    let settings = Settings::load(&mut conn).await?;
    let today = dates::effective_today(&settings)?;
    if query.target_date <= today {
        return Err(AppError::Validation("Target date must be in the future".into()));
    }

    let total = scoring::total_points(&mut conn).await?;
    let daily_average: f64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(AVG(daily_total), 0.0)
        FROM (SELECT daily_total FROM day_ledger ORDER BY date DESC LIMIT 30)
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    let days_remaining = (query.target_date - today).num_days();
    let projected = total + (daily_average * days_remaining as f64).round() as i64;

    Ok(Json(Projection {
        target_date: query.target_date,
        current_points: total,
        daily_average,
        days_remaining,
        projected_points: projected,
    }))
}
