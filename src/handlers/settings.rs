use axum::{extract::State, Json};

use crate::core::dates;
use crate::error::{AppError, AppResult};
use crate::models::settings::{Settings, UpdateSettingsRequest};
use crate::AppState;

pub async fn get_settings(State(state): State<AppState>) -> AppResult<Json<Settings>> {
    let mut conn = state.db.acquire().await?;
    let settings = Settings::load(&mut conn).await?;
    Ok(Json(settings))
}

fn validate(body: &UpdateSettingsRequest) -> AppResult<()> {
    for (label, value) in [
        ("day_start_time", &body.day_start_time),
        ("roll_available_time", &body.roll_available_time),
        ("penalty_time", &body.penalty_time),
        ("auto_roll_time", &body.auto_roll_time),
        ("backup_time", &body.backup_time),
    ] {
        if let Some(v) = value {
            dates::parse_hhmm(v)
                .map_err(|_| AppError::Validation(format!("{label} must be HH:MM, got {v:?}")))?;
        }
    }

    for (label, value) in [
        ("incomplete_day_threshold", body.incomplete_day_threshold),
        ("incomplete_threshold_severe", body.incomplete_threshold_severe),
        ("completion_bonus_full", body.completion_bonus_full),
        ("completion_bonus_good", body.completion_bonus_good),
    ] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(AppError::Validation(format!("{label} must be within 0.0..=1.0")));
            }
        }
    }

    if body.progressive_penalty_max.map(|v| v < 1.0).unwrap_or(false) {
        return Err(AppError::Validation("progressive_penalty_max must be at least 1.0".into()));
    }
    if body.progressive_penalty_factor.map(|v| v < 0.0).unwrap_or(false) {
        return Err(AppError::Validation("progressive_penalty_factor cannot be negative".into()));
    }
    for (label, value) in [
        ("max_tasks_per_day", body.max_tasks_per_day),
        ("penalty_streak_reset_days", body.penalty_streak_reset_days),
        ("backup_interval_days", body.backup_interval_days),
        ("minutes_per_energy_unit", body.minutes_per_energy_unit),
    ] {
        if value.map(|v| v < 1).unwrap_or(false) {
            return Err(AppError::Validation(format!("{label} must be at least 1")));
        }
    }
    for (label, value) in [
        ("critical_days", body.critical_days),
        ("max_streak_bonus_days", body.max_streak_bonus_days),
        ("min_work_time_seconds", body.min_work_time_seconds),
        ("backup_keep_local_count", body.backup_keep_local_count),
        ("idle_penalty", body.idle_penalty),
        ("incomplete_day_penalty", body.incomplete_day_penalty),
        ("incomplete_penalty_severe", body.incomplete_penalty_severe),
        ("missed_habit_penalty_base", body.missed_habit_penalty_base),
    ] {
        if value.map(|v| v < 0).unwrap_or(false) {
            return Err(AppError::Validation(format!("{label} cannot be negative")));
        }
    }
    Ok(())
}

/// Partial update of the tunable knobs. The engine-owned state columns
/// are not reachable from here.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<UpdateSettingsRequest>,
) -> AppResult<Json<Settings>> {
    validate(&body)?;

    sqlx::query(
        r#"
        UPDATE settings SET
            max_tasks_per_day = COALESCE(?1, max_tasks_per_day),
            critical_days = COALESCE(?2, critical_days),
            points_per_task_base = COALESCE(?3, points_per_task_base),
            points_per_habit_base = COALESCE(?4, points_per_habit_base),
            routine_points_fixed = COALESCE(?5, routine_points_fixed),
            energy_mult_base = COALESCE(?6, energy_mult_base),
            energy_mult_step = COALESCE(?7, energy_mult_step),
            streak_log_factor = COALESCE(?8, streak_log_factor),
            max_streak_bonus_days = COALESCE(?9, max_streak_bonus_days),
            minutes_per_energy_unit = COALESCE(?10, minutes_per_energy_unit),
            min_work_time_seconds = COALESCE(?11, min_work_time_seconds),
            time_efficiency_weight = COALESCE(?12, time_efficiency_weight),
            completion_bonus_full = COALESCE(?13, completion_bonus_full),
            completion_bonus_good = COALESCE(?14, completion_bonus_good),
            idle_penalty = COALESCE(?15, idle_penalty),
            incomplete_day_penalty = COALESCE(?16, incomplete_day_penalty),
            incomplete_day_threshold = COALESCE(?17, incomplete_day_threshold),
            incomplete_threshold_severe = COALESCE(?18, incomplete_threshold_severe),
            incomplete_penalty_severe = COALESCE(?19, incomplete_penalty_severe),
            missed_habit_penalty_base = COALESCE(?20, missed_habit_penalty_base),
            progressive_penalty_factor = COALESCE(?21, progressive_penalty_factor),
            progressive_penalty_max = COALESCE(?22, progressive_penalty_max),
            penalty_streak_reset_days = COALESCE(?23, penalty_streak_reset_days),
            day_start_enabled = COALESCE(?24, day_start_enabled),
            day_start_time = COALESCE(?25, day_start_time),
            roll_available_time = COALESCE(?26, roll_available_time),
            auto_penalties_enabled = COALESCE(?27, auto_penalties_enabled),
            penalty_time = COALESCE(?28, penalty_time),
            auto_roll_enabled = COALESCE(?29, auto_roll_enabled),
            auto_roll_time = COALESCE(?30, auto_roll_time),
            auto_backup_enabled = COALESCE(?31, auto_backup_enabled),
            backup_time = COALESCE(?32, backup_time),
            backup_interval_days = COALESCE(?33, backup_interval_days),
            backup_keep_local_count = COALESCE(?34, backup_keep_local_count)
        WHERE id = 1
        "#,
    )
    .bind(body.max_tasks_per_day)
    .bind(body.critical_days)
    .bind(body.points_per_task_base)
    .bind(body.points_per_habit_base)
    .bind(body.routine_points_fixed)
    .bind(body.energy_mult_base)
    .bind(body.energy_mult_step)
    .bind(body.streak_log_factor)
    .bind(body.max_streak_bonus_days)
    .bind(body.minutes_per_energy_unit)
    .bind(body.min_work_time_seconds)
    .bind(body.time_efficiency_weight)
    .bind(body.completion_bonus_full)
    .bind(body.completion_bonus_good)
    .bind(body.idle_penalty)
    .bind(body.incomplete_day_penalty)
    .bind(body.incomplete_day_threshold)
    .bind(body.incomplete_threshold_severe)
    .bind(body.incomplete_penalty_severe)
    .bind(body.missed_habit_penalty_base)
    .bind(body.progressive_penalty_factor)
    .bind(body.progressive_penalty_max)
    .bind(body.penalty_streak_reset_days)
    .bind(body.day_start_enabled)
    .bind(body.day_start_time)
    .bind(body.roll_available_time)
    .bind(body.auto_penalties_enabled)
    .bind(body.penalty_time)
    .bind(body.auto_roll_enabled)
    .bind(body.auto_roll_time)
    .bind(body.auto_backup_enabled)
    .bind(body.backup_time)
    .bind(body.backup_interval_days)
    .bind(body.backup_keep_local_count)
    .execute(&state.db)
    .await?;

    let mut conn = state.db.acquire().await?;
    let settings = Settings::load(&mut conn).await?;
    Ok(Json(settings))
}
