use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// The singleton settings row. Every tunable knob of the engine lives here,
/// not in the process environment, so the operator can change behavior at
/// runtime. The `last_*` columns are the persistent idempotence tokens for
/// the scheduler; `active_item_id` backs the single-active-item invariant.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Settings {
    pub id: i64,

    // planning
    pub max_tasks_per_day: i64,
    pub critical_days: i64,

    // reward coefficients
    pub points_per_task_base: i64,
    pub points_per_habit_base: i64,
    pub routine_points_fixed: i64,
    pub energy_mult_base: f64,
    pub energy_mult_step: f64,
    pub streak_log_factor: f64,
    pub max_streak_bonus_days: i64,
    pub minutes_per_energy_unit: i64,
    pub min_work_time_seconds: i64,
    pub time_efficiency_weight: f64,
    pub completion_bonus_full: f64,
    pub completion_bonus_good: f64,

    // penalties
    pub idle_penalty: i64,
    pub incomplete_day_penalty: i64,
    pub incomplete_day_threshold: f64,
    pub incomplete_threshold_severe: f64,
    pub incomplete_penalty_severe: i64,
    pub missed_habit_penalty_base: i64,
    pub progressive_penalty_factor: f64,
    pub progressive_penalty_max: f64,
    pub penalty_streak_reset_days: i64,

    // day boundary
    pub day_start_enabled: bool,
    pub day_start_time: String,

    // schedule
    pub roll_available_time: String,
    pub auto_penalties_enabled: bool,
    pub penalty_time: String,
    pub auto_roll_enabled: bool,
    pub auto_roll_time: String,
    pub auto_backup_enabled: bool,
    pub backup_time: String,
    pub backup_interval_days: i64,
    pub backup_keep_local_count: i64,

    // state
    pub last_roll_date: Option<NaiveDate>,
    pub last_penalty_date: Option<NaiveDate>,
    pub last_backup_date: Option<NaiveDate>,
    pub pending_roll: bool,
    pub active_item_id: Option<i64>,
}

impl Settings {
    /// Create the singleton row if it does not exist yet. The column
    /// defaults supply every coefficient; `last_penalty_date` is pinned to
    /// the creation date so the install day is never back-penalized.
    pub async fn ensure(conn: &mut SqliteConnection, today: NaiveDate) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO settings (id, last_penalty_date) VALUES (1, ?1)")
            .bind(today)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn load(conn: &mut SqliteConnection) -> Result<Settings, sqlx::Error> {
        sqlx::query_as::<_, Settings>("SELECT * FROM settings WHERE id = 1")
            .fetch_one(&mut *conn)
            .await
    }
}

/// Partial update for the tunable knobs. The state columns (`last_*`,
/// `pending_roll`, `active_item_id`) are owned by the engine and are not
/// settable through the API.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettingsRequest {
    pub max_tasks_per_day: Option<i64>,
    pub critical_days: Option<i64>,

    pub points_per_task_base: Option<i64>,
    pub points_per_habit_base: Option<i64>,
    pub routine_points_fixed: Option<i64>,
    pub energy_mult_base: Option<f64>,
    pub energy_mult_step: Option<f64>,
    pub streak_log_factor: Option<f64>,
    pub max_streak_bonus_days: Option<i64>,
    pub minutes_per_energy_unit: Option<i64>,
    pub min_work_time_seconds: Option<i64>,
    pub time_efficiency_weight: Option<f64>,
    pub completion_bonus_full: Option<f64>,
    pub completion_bonus_good: Option<f64>,

    pub idle_penalty: Option<i64>,
    pub incomplete_day_penalty: Option<i64>,
    pub incomplete_day_threshold: Option<f64>,
    pub incomplete_threshold_severe: Option<f64>,
    pub incomplete_penalty_severe: Option<i64>,
    pub missed_habit_penalty_base: Option<i64>,
    pub progressive_penalty_factor: Option<f64>,
    pub progressive_penalty_max: Option<f64>,
    pub penalty_streak_reset_days: Option<i64>,

    pub day_start_enabled: Option<bool>,
    pub day_start_time: Option<String>,

    pub roll_available_time: Option<String>,
    pub auto_penalties_enabled: Option<bool>,
    pub penalty_time: Option<String>,
    pub auto_roll_enabled: Option<bool>,
    pub auto_roll_time: Option<String>,
    pub auto_backup_enabled: Option<bool>,
    pub backup_time: Option<String>,
    pub backup_interval_days: Option<i64>,
    pub backup_keep_local_count: Option<i64>,
}
