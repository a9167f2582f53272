use std::collections::HashSet;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::core::{dates, scoring};
use crate::error::{AppError, AppResult};
use crate::models::settings::Settings;
use crate::models::work_item::WorkItem;

#[derive(Debug, Serialize)]
pub struct RollOutcome {
    pub date: NaiveDate,
    pub planned: Vec<WorkItem>,
    pub habits_due: Vec<WorkItem>,
    pub finalized: Vec<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct RollAvailability {
    pub can_roll: bool,
    pub reason: Option<String>,
    pub effective_date: NaiveDate,
    pub pending_roll: bool,
}

/// How urgently a pending task wants a slot today.
pub(crate) fn urgency(task: &WorkItem, today: NaiveDate) -> i64 {
    let mut u = task.priority * 10;
    if let Some(due) = task.due_date {
        u += if due < today {
            50
        } else if due <= today + Duration::days(2) {
            25
        } else if due <= today + Duration::days(7) {
            10
        } else {
            0
        };
    }
    u += match task.energy {
        e if e >= 4 => 5,
        e if e <= 1 => -1,
        _ => 0,
    };
    u
}

fn dep_ok(task: &WorkItem, completed: &HashSet<i64>) -> bool {
    task.depends_on.map(|d| completed.contains(&d)).unwrap_or(true)
}

fn push_unique(chosen: &mut Vec<i64>, id: i64, max: usize) -> bool {
    if chosen.len() >= max || chosen.contains(&id) {
        return false;
    }
    chosen.push(id);
    true
}

/// Backlog fill: dependency-safe candidates by urgency, ties by id.
fn fill_backlog(
    chosen: &mut Vec<i64>,
    order: &[&WorkItem],
    completed: &HashSet<i64>,
    max: usize,
    fits: &dyn Fn(&WorkItem) -> bool,
) {
    for t in order {
        if chosen.len() >= max {
            break;
        }
        if dep_ok(t, completed) && fits(t) {
            push_unique(chosen, t.id, max);
        }
    }
}

/// Same-day dependents: tasks whose dependency is already in the chosen
/// set. Looped so a chain can pull itself in link by link.
fn fill_dependents(
    chosen: &mut Vec<i64>,
    order: &[&WorkItem],
    max: usize,
    fits: &dyn Fn(&WorkItem) -> bool,
) {
    loop {
        let before = chosen.len();
        let in_set: HashSet<i64> = chosen.iter().copied().collect();
        for t in order {
            if chosen.len() >= max {
                return;
            }
            if t.depends_on.map(|d| in_set.contains(&d)).unwrap_or(false) && fits(t) {
                push_unique(chosen, t.id, max);
            }
        }
        if chosen.len() == before {
            return;
        }
    }
}

/// Drop chosen items whose dependency is neither completed nor still in
/// the set (their anchor fell to the mood filter).
fn prune_orphans(chosen: &mut Vec<i64>, tasks: &[WorkItem], completed: &HashSet<i64>) {
    loop {
        let in_set: HashSet<i64> = chosen.iter().copied().collect();
        let before = chosen.len();
        chosen.retain(|id| {
            tasks
                .iter()
                .find(|t| t.id == *id)
                .map(|t| {
                    t.depends_on
                        .map(|d| completed.contains(&d) || in_set.contains(&d))
                        .unwrap_or(true)
                })
                .unwrap_or(false)
        });
        if chosen.len() == before {
            return;
        }
    }
}

/// The selection half of the Roll: critical pass, backlog pass, same-day
/// dependents, then the optional mood filter with a constrained refill.
pub(crate) fn select_agenda(
    tasks: &[WorkItem],
    completed: &HashSet<i64>,
    today: NaiveDate,
    critical_days: i64,
    max_tasks: i64,
    mood: Option<i64>,
) -> Vec<i64> {
    let max = max_tasks.max(0) as usize;
    let mut order: Vec<&WorkItem> = tasks.iter().collect();
    order.sort_by(|a, b| {
        urgency(b, today)
            .cmp(&urgency(a, today))
            .then(a.id.cmp(&b.id))
    });

    let mut chosen: Vec<i64> = Vec::new();
    let horizon = today + Duration::days(critical_days.max(0));
    for t in &order {
        if chosen.len() >= max {
            break;
        }
        if t.due_date.map(|d| d <= horizon).unwrap_or(false) && dep_ok(t, completed) {
            push_unique(&mut chosen, t.id, max);
        }
    }
    fill_backlog(&mut chosen, &order, completed, max, &|_| true);
    fill_dependents(&mut chosen, &order, max, &|_| true);

    if let Some(m) = mood {
        chosen.retain(|id| {
            tasks
                .iter()
                .find(|t| t.id == *id)
                .map(|t| t.energy <= m)
                .unwrap_or(false)
        });
        prune_orphans(&mut chosen, tasks, completed);
        let fits = |t: &WorkItem| t.energy <= m;
        fill_backlog(&mut chosen, &order, completed, max, &fits);
        fill_dependents(&mut chosen, &order, max, &fits);
    }

    chosen
}

pub async fn can_roll(pool: &SqlitePool, now_local: NaiveDateTime) -> AppResult<RollAvailability> {
    let mut conn = pool.acquire().await?;
    let s = Settings::load(&mut conn).await?;
    let today = dates::effective_for(&s, now_local)?;
    let available_at = dates::parse_hhmm(&s.roll_available_time)?;

    let reason = if now_local.time() < available_at {
        Some(format!("Roll opens at {}", s.roll_available_time))
    } else if s.last_roll_date.map(|d| d >= today).unwrap_or(false) {
        Some("Already rolled for this date".into())
    } else {
        None
    };

    Ok(RollAvailability {
        can_roll: reason.is_none(),
        reason,
        effective_date: today,
        pending_roll: s.pending_roll,
    })
}

/// The daily Roll: purge stale habit occurrences, pick the agenda, close
/// out earlier days, stamp the idempotence token. One transaction.
pub async fn roll(
    pool: &SqlitePool,
    mood: Option<i64>,
    now_local: NaiveDateTime,
) -> AppResult<RollOutcome> {
    if let Some(m) = mood {
        if !(0..=5).contains(&m) {
            return Err(AppError::Validation("Mood must be between 0 and 5".into()));
        }
    }

    let mut tx = pool.begin().await?;
    let s = Settings::load(&mut tx).await?;
    let today = dates::effective_for(&s, now_local)?;

    let available_at = dates::parse_hhmm(&s.roll_available_time)?;
    if now_local.time() < available_at {
        return Err(AppError::RollNotAvailable(format!(
            "Roll opens at {}",
            s.roll_available_time
        )));
    }
    if s.last_roll_date.map(|d| d >= today).unwrap_or(false) {
        return Err(AppError::RollAlreadyDone);
    }

    // 1. Advance habits whose occurrence dates slipped past, recording
    // each skipped occurrence for that date's finalization.
    let overdue: Vec<WorkItem> = sqlx::query_as(
        r#"
        SELECT * FROM work_items
        WHERE is_habit = 1 AND status != 'completed'
          AND due_date IS NOT NULL AND due_date < ?1
        "#,
    )
    .bind(today)
    .fetch_all(&mut *tx)
    .await?;

    for habit in &overdue {
        let Some(mut cursor) = habit.due_date else {
            continue;
        };
        let rec = habit.recurrence();
        let mut terminal = false;
        let mut missed = 0;
        while cursor < today {
            sqlx::query("INSERT INTO habit_misses (item_id, missed_date) VALUES (?1, ?2)")
                .bind(habit.id)
                .bind(cursor)
                .execute(&mut *tx)
                .await?;
            missed += 1;
            match rec.next_occurrence(cursor) {
                Some(next) if next > cursor => cursor = next,
                _ => {
                    terminal = true;
                    break;
                }
            }
        }
        if terminal {
            sqlx::query(
                "UPDATE work_items SET status = 'skipped', daily_completed = 0, streak = 0 WHERE id = ?1",
            )
            .bind(habit.id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE work_items SET due_date = ?2, daily_completed = 0, streak = 0 WHERE id = ?1",
            )
            .bind(habit.id)
            .bind(cursor)
            .execute(&mut *tx)
            .await?;
        }
        tracing::debug!(habit_id = habit.id, missed, "purged overdue habit occurrences");
    }

    // 2. Yesterday's agenda is void.
    sqlx::query("UPDATE work_items SET is_today = 0 WHERE is_habit = 0")
        .execute(&mut *tx)
        .await?;

    // 3-7. Selection.
    let tasks: Vec<WorkItem> =
        sqlx::query_as("SELECT * FROM work_items WHERE is_habit = 0 AND status = 'pending' ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;
    let completed: HashSet<i64> =
        sqlx::query_scalar::<_, i64>("SELECT id FROM work_items WHERE status = 'completed'")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
    let chosen = select_agenda(
        &tasks,
        &completed,
        today,
        s.critical_days,
        s.max_tasks_per_day,
        mood,
    );

    // 8. Mark the agenda.
    for id in &chosen {
        sqlx::query("UPDATE work_items SET is_today = 1 WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    // 9. Today's habits are derived from their due date, never flagged.
    let habits_due: Vec<WorkItem> = sqlx::query_as(
        "SELECT * FROM work_items WHERE is_habit = 1 AND due_date = ?1 AND status != 'completed' ORDER BY id",
    )
    .bind(today)
    .fetch_all(&mut *tx)
    .await?;

    let ledger = scoring::fetch_or_create_ledger(&mut tx, today).await?;
    let planned = chosen.len() as i64;
    let rate = if planned > 0 {
        ledger.tasks_completed as f64 / planned as f64
    } else {
        0.0
    };
    sqlx::query(
        "UPDATE day_ledger SET tasks_planned = ?2, habits_total = ?3, completion_rate = ?4 WHERE date = ?1",
    )
    .bind(today)
    .bind(planned)
    .bind(habits_due.len() as i64)
    .bind(rate)
    .execute(&mut *tx)
    .await?;

    // 10. Close out every day the scheduler has not reached yet.
    let finalized = scoring::finalize_pending(&mut tx, &s, today).await?;

    // 11. Stamp the token.
    sqlx::query("UPDATE settings SET last_roll_date = ?1, pending_roll = 0 WHERE id = 1")
        .bind(today)
        .execute(&mut *tx)
        .await?;

    let planned_items: Vec<WorkItem> =
        sqlx::query_as("SELECT * FROM work_items WHERE is_today = 1 ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;

    tx.commit().await?;

    tracing::info!(
        date = %today,
        planned = planned_items.len(),
        habits = habits_due.len(),
        finalized = finalized.len(),
        "rolled the day"
    );

    Ok(RollOutcome {
        date: today,
        planned: planned_items,
        habits_due,
        finalized,
    })
}
