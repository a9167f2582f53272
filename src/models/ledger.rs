use chrono::NaiveDate;
use serde::Serialize;
use sqlx::FromRow;

/// One row per effective date. `points_earned` and `points_penalty` are
/// kept as separate scalars for audit; `daily_total` is always their
/// difference. The all-time score is the sum of `daily_total` across rows,
/// never a stored field.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DayLedger {
    pub date: NaiveDate,
    pub points_earned: i64,
    pub points_penalty: i64,
    pub daily_total: i64,
    pub tasks_completed: i64,
    pub tasks_planned: i64,
    pub habits_completed: i64,
    pub habits_total: i64,
    pub completion_rate: f64,
    pub penalty_streak: i64,
}
