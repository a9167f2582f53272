use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::core::recurrence::Recurrence;
use crate::core::{dates, tracker};
use crate::error::{AppError, AppResult};
use crate::models::settings::Settings;
use crate::models::work_item::{
    CompleteRequest, CreateItemRequest, HabitType, ItemFilter, ItemListQuery, UpdateItemRequest,
    WorkItem,
};
use crate::AppState;

async fn load_settings(pool: &SqlitePool) -> AppResult<Settings> {
    let mut conn = pool.acquire().await?;
    Ok(Settings::load(&mut conn).await?)
}

fn validate_priority(priority: i64) -> AppResult<()> {
    if !(0..=10).contains(&priority) {
        return Err(AppError::Validation("Priority must be between 0 and 10".into()));
    }
    Ok(())
}

fn validate_energy(energy: i64) -> AppResult<()> {
    if !(0..=5).contains(&energy) {
        return Err(AppError::Validation("Energy must be between 0 and 5".into()));
    }
    Ok(())
}

fn validate_recurrence(recurrence: &Recurrence) -> AppResult<()> {
    match recurrence {
        Recurrence::EveryNDays { interval } if *interval < 1 => {
            Err(AppError::Validation("Recurrence interval must be at least 1".into()))
        }
        Recurrence::Weekly { days } => {
            if days.is_empty() {
                return Err(AppError::Validation("Weekly recurrence needs at least one weekday".into()));
            }
            if days.iter().any(|d| *d > 6) {
                return Err(AppError::Validation("Weekdays are numbered 0 (Monday) to 6 (Sunday)".into()));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Reject a `depends_on` edge that would close a loop. The relation is a
/// single edge per item, so walking up from the proposed dependency is
/// enough.
async fn ensure_no_cycle(pool: &SqlitePool, item_id: i64, dep_id: i64) -> AppResult<()> {
    let mut current = Some(dep_id);
    let mut hops = 0;
    while let Some(id) = current {
        if id == item_id {
            return Err(AppError::Validation("Dependency would create a cycle".into()));
        }
        current = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT depends_on FROM work_items WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .flatten();
        hops += 1;
        if hops > 256 {
            return Err(AppError::Validation("Dependency chain is too deep".into()));
        }
    }
    Ok(())
}

async fn ensure_dependency_exists(pool: &SqlitePool, dep_id: i64) -> AppResult<()> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_items WHERE id = ?1")
        .bind(dep_id)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Err(AppError::Validation(format!("Dependency {dep_id} does not exist")));
    }
    Ok(())
}

pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemListQuery>,
) -> AppResult<Json<Vec<WorkItem>>> {
    let sql = match query.filter.unwrap_or(ItemFilter::All) {
        ItemFilter::All => "SELECT * FROM work_items ORDER BY id",
        ItemFilter::Pending => "SELECT * FROM work_items WHERE status = 'pending' ORDER BY id",
        ItemFilter::Active => "SELECT * FROM work_items WHERE status = 'active' ORDER BY id",
        ItemFilter::Today => {
            "SELECT * FROM work_items WHERE is_today = 1 AND is_habit = 0 ORDER BY id"
        }
    };
    let items = sqlx::query_as::<_, WorkItem>(sql).fetch_all(&state.db).await?;
    Ok(Json(items))
}

/// Habits owed today. Purely derived from the due date; habits never
/// carry the `is_today` flag.
pub async fn today_habits(State(state): State<AppState>) -> AppResult<Json<Vec<WorkItem>>> {
    let settings = load_settings(&state.db).await?;
    let today = dates::effective_today(&settings)?;
    let habits = sqlx::query_as::<_, WorkItem>(
        "SELECT * FROM work_items WHERE is_habit = 1 AND due_date = ?1 AND status != 'completed' ORDER BY id",
    )
    .bind(today)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(habits))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<WorkItem>> {
    let item = sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = ?1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Work item {id} not found")))?;
    Ok(Json(item))
}

pub async fn create_item(
    State(state): State<AppState>,
    Json(body): Json<CreateItemRequest>,
) -> AppResult<Json<WorkItem>> {
    if body.description.trim().is_empty() {
        return Err(AppError::Validation("Description is required".into()));
    }
    let priority = body.priority.unwrap_or(5);
    validate_priority(priority)?;
    let energy = body.energy.unwrap_or(2);
    validate_energy(energy)?;
    let daily_target = body.daily_target.unwrap_or(1);
    if daily_target < 1 {
        return Err(AppError::Validation("Daily target must be at least 1".into()));
    }

    let is_habit = body.is_habit.unwrap_or(false);
    if !is_habit && (body.habit_type.is_some() || body.recurrence.is_some()) {
        return Err(AppError::Validation(
            "Habit type and recurrence only apply to habits".into(),
        ));
    }

    if let Some(dep_id) = body.depends_on {
        ensure_dependency_exists(&state.db, dep_id).await?;
    }

    let settings = load_settings(&state.db).await?;
    let today = dates::effective_today(&settings)?;

    let (habit_type, recurrence, due_date) = if is_habit {
        let recurrence = body.recurrence.unwrap_or(Recurrence::Daily);
        validate_recurrence(&recurrence)?;
        (
            Some(body.habit_type.unwrap_or(HabitType::Skill)),
            recurrence,
            // A habit's due date is its next occurrence; default to today.
            Some(body.due_date.unwrap_or(today)),
        )
    } else {
        (None, Recurrence::None, body.due_date)
    };

    let item = sqlx::query_as::<_, WorkItem>(
        r#"
        INSERT INTO work_items
            (description, project, priority, energy, is_habit, due_date, created_at,
             depends_on, habit_type, recur_kind, recur_interval, recur_days, daily_target)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        RETURNING *
        "#,
    )
    .bind(body.description.trim())
    .bind(&body.project)
    .bind(priority)
    .bind(energy)
    .bind(is_habit)
    .bind(due_date)
    .bind(Utc::now())
    .bind(body.depends_on)
    .bind(habit_type)
    .bind(recurrence.kind())
    .bind(recurrence.interval())
    .bind(recurrence.days_json())
    .bind(daily_target)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(item))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateItemRequest>,
) -> AppResult<Json<WorkItem>> {
    let existing = sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = ?1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Work item {id} not found")))?;

    if let Some(description) = &body.description {
        if description.trim().is_empty() {
            return Err(AppError::Validation("Description cannot be empty".into()));
        }
    }
    if let Some(priority) = body.priority {
        validate_priority(priority)?;
    }
    if let Some(energy) = body.energy {
        validate_energy(energy)?;
    }
    if let Some(target) = body.daily_target {
        if target < 1 {
            return Err(AppError::Validation("Daily target must be at least 1".into()));
        }
    }
    if !existing.is_habit && (body.habit_type.is_some() || body.recurrence.is_some()) {
        return Err(AppError::Validation(
            "Habit type and recurrence only apply to habits".into(),
        ));
    }
    if let Some(dep_id) = body.depends_on {
        if dep_id == id {
            return Err(AppError::Validation("An item cannot depend on itself".into()));
        }
        ensure_dependency_exists(&state.db, dep_id).await?;
        ensure_no_cycle(&state.db, id, dep_id).await?;
    }
    if let Some(recurrence) = &body.recurrence {
        validate_recurrence(recurrence)?;
    }

    let (recur_kind, recur_interval, recur_days) = match &body.recurrence {
        Some(r) => (Some(r.kind()), r.interval(), r.days_json()),
        None => (None, None, None),
    };

    let item = sqlx::query_as::<_, WorkItem>(
        r#"
        UPDATE work_items SET
            description = COALESCE(?2, description),
            project = COALESCE(?3, project),
            priority = COALESCE(?4, priority),
            energy = COALESCE(?5, energy),
            due_date = COALESCE(?6, due_date),
            depends_on = COALESCE(?7, depends_on),
            habit_type = COALESCE(?8, habit_type),
            recur_kind = COALESCE(?9, recur_kind),
            recur_interval = CASE WHEN ?9 IS NULL THEN recur_interval ELSE ?10 END,
            recur_days = CASE WHEN ?9 IS NULL THEN recur_days ELSE ?11 END,
            daily_target = COALESCE(?12, daily_target)
        WHERE id = ?1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(body.description.as_deref().map(str::trim))
    .bind(&body.project)
    .bind(body.priority)
    .bind(body.energy)
    .bind(body.due_date)
    .bind(body.depends_on)
    .bind(body.habit_type)
    .bind(recur_kind)
    .bind(recur_interval)
    .bind(recur_days)
    .bind(body.daily_target)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM work_items WHERE id = ?1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Work item {id} not found")));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn start_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<WorkItem>> {
    let settings = load_settings(&state.db).await?;
    let today = dates::effective_today(&settings)?;
    let item = tracker::start_item(&state.db, id, Utc::now(), today).await?;
    Ok(Json(item))
}

pub async fn stop_item(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let stopped = tracker::stop_active(&state.db, Utc::now()).await?;
    Ok(Json(serde_json::json!({ "stopped": stopped })))
}

pub async fn complete_item(
    State(state): State<AppState>,
    body: Option<Json<CompleteRequest>>,
) -> AppResult<Json<tracker::CompletionOutcome>> {
    let id = body.and_then(|Json(b)| b.id);
    let settings = load_settings(&state.db).await?;
    let today = dates::effective_today(&settings)?;
    let outcome = tracker::complete_item(&state.db, id, Utc::now(), today).await?;
    Ok(Json(outcome))
}
