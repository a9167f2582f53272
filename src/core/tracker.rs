use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::core::scoring;
use crate::error::{AppError, AppResult};
use crate::models::settings::Settings;
use crate::models::work_item::{ItemStatus, WorkItem};

#[derive(Debug, Serialize)]
pub struct CompletionOutcome {
    pub item: WorkItem,
    pub points: i64,
}

async fn fetch_item(conn: &mut SqliteConnection, id: i64) -> AppResult<WorkItem> {
    sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Work item {id} not found")))
}

/// Move the active item (if any) back to pending, banking its elapsed
/// seconds, and clear the active marker.
async fn park_active(
    conn: &mut SqliteConnection,
    active_id: Option<i64>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let Some(id) = active_id else {
        return Ok(());
    };
    let item = fetch_item(&mut *conn, id).await?;
    let elapsed = item
        .started_at
        .map(|t| (now - t).num_seconds().max(0))
        .unwrap_or(0);
    sqlx::query(
        "UPDATE work_items SET status = 'pending', started_at = NULL, time_spent = time_spent + ?2 WHERE id = ?1",
    )
    .bind(id)
    .bind(elapsed)
    .execute(&mut *conn)
    .await?;
    sqlx::query("UPDATE settings SET active_item_id = NULL WHERE id = 1")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn dependency_satisfied(dep: &WorkItem, today: NaiveDate) -> bool {
    dep.status == ItemStatus::Completed
        || dep.is_today
        || (dep.is_habit && dep.due_date == Some(today))
}

/// Begin working an item. Any other active item is parked first, in the
/// same transaction, so at most one item is ever active.
pub async fn start_item(
    pool: &SqlitePool,
    id: i64,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> AppResult<WorkItem> {
    let mut tx = pool.begin().await?;
    let settings = Settings::load(&mut tx).await?;

    let item = fetch_item(&mut tx, id).await?;
    if item.status == ItemStatus::Completed {
        return Err(AppError::Validation("Item is already completed".into()));
    }
    if settings.active_item_id == Some(id) {
        return Ok(item);
    }

    if let Some(dep_id) = item.depends_on {
        // A dangling edge (dependency deleted) does not block.
        if let Some(dep) = sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = ?1")
            .bind(dep_id)
            .fetch_optional(&mut *tx)
            .await?
        {
            if !dependency_satisfied(&dep, today) {
                return Err(AppError::DependencyNotMet(format!(
                    "Blocked on \"{}\" (neither completed nor planned today)",
                    dep.description
                )));
            }
        }
    }

    park_active(&mut tx, settings.active_item_id, now).await?;

    sqlx::query("UPDATE work_items SET status = 'active', started_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE settings SET active_item_id = ?1 WHERE id = 1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let item = fetch_item(&mut tx, id).await?;
    tx.commit().await?;
    Ok(item)
}

/// Park the active item. No-op when nothing is active.
pub async fn stop_active(pool: &SqlitePool, now: DateTime<Utc>) -> AppResult<Option<WorkItem>> {
    let mut tx = pool.begin().await?;
    let settings = Settings::load(&mut tx).await?;
    let Some(id) = settings.active_item_id else {
        return Ok(None);
    };
    park_active(&mut tx, Some(id), now).await?;
    let item = fetch_item(&mut tx, id).await?;
    tx.commit().await?;
    Ok(Some(item))
}

/// Complete an item, or the active item when no id is given. Habits count
/// toward their daily target and only close (and pay) when it is met, at
/// which point the recurrence engine schedules the next occurrence.
pub async fn complete_item(
    pool: &SqlitePool,
    id: Option<i64>,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> AppResult<CompletionOutcome> {
    let mut tx = pool.begin().await?;
    let settings = Settings::load(&mut tx).await?;

    let id = id
        .or(settings.active_item_id)
        .ok_or_else(|| AppError::Validation("No item id given and nothing is active".into()))?;
    let mut item = fetch_item(&mut tx, id).await?;
    if item.status == ItemStatus::Completed {
        return Err(AppError::Validation("Item is already completed".into()));
    }

    if settings.active_item_id == Some(id) {
        if let Some(t) = item.started_at {
            item.time_spent += (now - t).num_seconds().max(0);
        }
        item.started_at = None;
        sqlx::query("UPDATE settings SET active_item_id = NULL WHERE id = 1")
            .execute(&mut *tx)
            .await?;
    }

    let mut points = 0;
    let mut scored = false;
    if !item.is_habit {
        item.status = ItemStatus::Completed;
        item.completed_at = Some(now);
        points = scoring::reward_for(&settings, &item);
        scored = true;
    } else {
        if item.due_date.map(|d| d > today).unwrap_or(false) {
            return Err(AppError::Validation("Habit is not due yet".into()));
        }
        item.daily_completed += 1;
        if item.daily_completed >= item.daily_target {
            // The streak entering this completion sets the bonus.
            points = scoring::reward_for(&settings, &item);
            scored = true;
            item.streak = (item.streak + 1).min(settings.max_streak_bonus_days);
            item.last_completed_date = Some(today);
            match item.recurrence().next_occurrence(today) {
                Some(next) => {
                    item.due_date = Some(next);
                    item.daily_completed = 0;
                    item.status = ItemStatus::Pending;
                    item.completed_at = None;
                }
                None => {
                    item.status = ItemStatus::Completed;
                    item.completed_at = Some(now);
                }
            }
        } else {
            item.status = ItemStatus::Pending;
        }
    }

    sqlx::query(
        r#"
        UPDATE work_items SET
            status = ?2,
            started_at = ?3,
            completed_at = ?4,
            time_spent = ?5,
            due_date = ?6,
            streak = ?7,
            last_completed_date = ?8,
            daily_completed = ?9
        WHERE id = ?1
        "#,
    )
    .bind(item.id)
    .bind(item.status)
    .bind(item.started_at)
    .bind(item.completed_at)
    .bind(item.time_spent)
    .bind(item.due_date)
    .bind(item.streak)
    .bind(item.last_completed_date)
    .bind(item.daily_completed)
    .execute(&mut *tx)
    .await?;

    if scored {
        scoring::record_completion(&mut tx, &settings, today, item.is_habit, points).await?;
    }

    tx.commit().await?;
    Ok(CompletionOutcome { item, points })
}
