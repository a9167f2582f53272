use chrono::{Duration, NaiveDate};
use sqlx::SqliteConnection;

use crate::error::{AppError, AppResult};
use crate::models::goal::{Goal, GoalType};
use crate::models::ledger::DayLedger;
use crate::models::settings::Settings;
use crate::models::work_item::{HabitType, WorkItem};

/// Floor of the time-quality factor. A badly overrun task still pays a
/// fifth of its base rather than nothing.
pub const MIN_TIME_QUALITY: f64 = 0.2;

/// Completion-rate band that earns the smaller finalize-time bonus.
pub const GOOD_DAY_THRESHOLD: f64 = 0.8;

pub fn energy_multiplier(s: &Settings, energy: i64) -> f64 {
    s.energy_mult_base + energy as f64 * s.energy_mult_step
}

/// How well actual time matched the energy-derived expectation.
/// Finishing under the expectation caps at 1.0; energy-0 items have no
/// expectation and always score 1.0.
pub fn time_quality(s: &Settings, energy: i64, time_spent: i64) -> f64 {
    let expected = (energy * s.minutes_per_energy_unit * 60) as f64;
    if expected <= 0.0 {
        return 1.0;
    }
    let q = 1.0 - ((time_spent as f64 - expected) / expected) * s.time_efficiency_weight;
    q.clamp(MIN_TIME_QUALITY, 1.0)
}

pub fn task_reward(s: &Settings, energy: i64, time_spent: i64) -> i64 {
    let focus = if time_spent >= s.min_work_time_seconds { 1.0 } else { 0.5 };
    (s.points_per_task_base as f64
        * energy_multiplier(s, energy)
        * time_quality(s, energy, time_spent)
        * focus)
        .round() as i64
}

/// Skill habits earn a logarithmic streak bonus. `streak` is the value
/// from before this completion's increment.
pub fn skill_reward(s: &Settings, energy: i64, streak: i64) -> i64 {
    let capped = streak.clamp(0, s.max_streak_bonus_days);
    let bonus = 1.0 + ((capped + 1) as f64).log2() * s.streak_log_factor;
    (s.points_per_habit_base as f64 * bonus * energy_multiplier(s, energy)).round() as i64
}

pub fn routine_reward(s: &Settings) -> i64 {
    s.routine_points_fixed
}

/// Points for completing `item`, dispatched on its category.
pub fn reward_for(s: &Settings, item: &WorkItem) -> i64 {
    if !item.is_habit {
        task_reward(s, item.energy, item.time_spent)
    } else {
        match item.habit_type {
            Some(HabitType::Routine) => routine_reward(s),
            _ => skill_reward(s, item.energy, item.streak),
        }
    }
}

pub async fn fetch_ledger(
    conn: &mut SqliteConnection,
    date: NaiveDate,
) -> Result<Option<DayLedger>, sqlx::Error> {
    sqlx::query_as::<_, DayLedger>("SELECT * FROM day_ledger WHERE date = ?1")
        .bind(date)
        .fetch_optional(&mut *conn)
        .await
}

/// Ledger rows are created lazily, on the first scoring event of a date.
pub async fn fetch_or_create_ledger(
    conn: &mut SqliteConnection,
    date: NaiveDate,
) -> Result<DayLedger, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO day_ledger (date) VALUES (?1)")
        .bind(date)
        .execute(&mut *conn)
        .await?;
    sqlx::query_as::<_, DayLedger>("SELECT * FROM day_ledger WHERE date = ?1")
        .bind(date)
        .fetch_one(&mut *conn)
        .await
}

fn completion_rate(completed: i64, planned: i64) -> f64 {
    if planned > 0 {
        completed as f64 / planned as f64
    } else {
        0.0
    }
}

/// Credit a completion to the effective date's ledger. Pays the full-day
/// bonus exactly when a task completion brings the count level with the
/// plan; habit completions never re-trigger it.
pub async fn record_completion(
    conn: &mut SqliteConnection,
    s: &Settings,
    date: NaiveDate,
    is_habit: bool,
    points: i64,
) -> AppResult<DayLedger> {
    let mut ledger = fetch_or_create_ledger(&mut *conn, date).await?;

    ledger.points_earned += points;
    if is_habit {
        ledger.habits_completed += 1;
    } else {
        ledger.tasks_completed += 1;
        if ledger.tasks_planned > 0 && ledger.tasks_completed == ledger.tasks_planned {
            let bonus = (ledger.points_earned as f64 * s.completion_bonus_full).round() as i64;
            ledger.points_earned += bonus;
            tracing::info!(date = %date, bonus, "full completion bonus");
        }
    }
    ledger.completion_rate = completion_rate(ledger.tasks_completed, ledger.tasks_planned);
    ledger.daily_total = ledger.points_earned - ledger.points_penalty;

    sqlx::query(
        r#"
        UPDATE day_ledger SET
            points_earned = ?2,
            tasks_completed = ?3,
            habits_completed = ?4,
            completion_rate = ?5,
            daily_total = ?6
        WHERE date = ?1
        "#,
    )
    .bind(date)
    .bind(ledger.points_earned)
    .bind(ledger.tasks_completed)
    .bind(ledger.habits_completed)
    .bind(ledger.completion_rate)
    .bind(ledger.daily_total)
    .execute(&mut *conn)
    .await?;

    check_goals(&mut *conn, date).await?;
    Ok(ledger)
}

/// Close the books for `date`: pay the near-complete bonus, apply the
/// penalty rules in order, update the penalty streak. Exactly once per
/// date; the caller owns the `last_penalty_date` token.
pub async fn finalize_day(
    conn: &mut SqliteConnection,
    s: &Settings,
    date: NaiveDate,
) -> AppResult<DayLedger> {
    let token: Option<NaiveDate> =
        sqlx::query_scalar("SELECT last_penalty_date FROM settings WHERE id = 1")
            .fetch_one(&mut *conn)
            .await?;
    if token.map(|t| date <= t).unwrap_or(false) {
        return Err(AppError::AlreadyFinalized(date));
    }

    let mut ledger = fetch_or_create_ledger(&mut *conn, date).await?;
    let prev_streak: i64 = fetch_ledger(&mut *conn, date - Duration::days(1))
        .await?
        .map(|l| l.penalty_streak)
        .unwrap_or(0);

    // Near-complete bonus is only decidable once the day is over.
    let rate = completion_rate(ledger.tasks_completed, ledger.tasks_planned);
    if ledger.tasks_planned > 0 && rate >= GOOD_DAY_THRESHOLD && rate < 1.0 {
        let bonus = (ledger.points_earned as f64 * s.completion_bonus_good).round() as i64;
        ledger.points_earned += bonus;
        tracing::info!(date = %date, bonus, "near-complete day bonus");
    }

    let rest_day: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rest_days WHERE date = ?1")
        .bind(date)
        .fetch_one(&mut *conn)
        .await?;

    let mut total: i64 = 0;
    if rest_day == 0 {
        let mut base: i64 = 0;

        if ledger.tasks_completed == 0 && ledger.habits_completed == 0 {
            base += s.idle_penalty;
        }

        if ledger.tasks_planned > 0 {
            if rate < s.incomplete_threshold_severe {
                base += s.incomplete_penalty_severe;
            } else if rate < s.incomplete_day_threshold {
                base += (s.incomplete_day_penalty as f64 * (1.0 - rate)).round() as i64;
            }
        }

        base += missed_habit_penalties(&mut *conn, s, date).await?;

        if base > 0 {
            let multiplier = 1.0
                + (prev_streak as f64 * s.progressive_penalty_factor)
                    .min(s.progressive_penalty_max - 1.0);
            total = (base as f64 * multiplier).round() as i64;
        }
    }

    ledger.points_penalty = total;
    ledger.daily_total = ledger.points_earned - ledger.points_penalty;
    ledger.completion_rate = rate;
    ledger.penalty_streak = if total > 0 {
        prev_streak + 1
    } else if clean_window(&mut *conn, date, s.penalty_streak_reset_days).await? {
        0
    } else {
        prev_streak
    };

    sqlx::query(
        r#"
        UPDATE day_ledger SET
            points_earned = ?2,
            points_penalty = ?3,
            daily_total = ?4,
            completion_rate = ?5,
            penalty_streak = ?6
        WHERE date = ?1
        "#,
    )
    .bind(date)
    .bind(ledger.points_earned)
    .bind(ledger.points_penalty)
    .bind(ledger.daily_total)
    .bind(ledger.completion_rate)
    .bind(ledger.penalty_streak)
    .execute(&mut *conn)
    .await?;

    check_goals(&mut *conn, date).await?;
    Ok(ledger)
}

/// Penalties for habits that owed an occurrence on `date`: habits still
/// overdue in the store, plus occurrences the roll purge already advanced
/// past and recorded. The two sources cannot overlap for one date because
/// the purge moves `due_date` beyond every date finalization can still
/// reach. Consumed (and stale) miss records are deleted.
async fn missed_habit_penalties(
    conn: &mut SqliteConnection,
    s: &Settings,
    date: NaiveDate,
) -> AppResult<i64> {
    let live: Vec<(i64, Option<HabitType>)> = sqlx::query_as(
        r#"
        SELECT id, habit_type FROM work_items
        WHERE is_habit = 1 AND status != 'completed'
          AND due_date IS NOT NULL AND due_date <= ?1
          AND daily_completed < daily_target
        "#,
    )
    .bind(date)
    .fetch_all(&mut *conn)
    .await?;

    let recorded: Vec<(i64, Option<HabitType>)> = sqlx::query_as(
        r#"
        SELECT hm.item_id, wi.habit_type
        FROM habit_misses hm JOIN work_items wi ON wi.id = hm.item_id
        WHERE hm.missed_date = ?1
        "#,
    )
    .bind(date)
    .fetch_all(&mut *conn)
    .await?;

    let mut sum = 0;
    for (_, habit_type) in live.iter().chain(recorded.iter()) {
        sum += match habit_type {
            Some(HabitType::Routine) => (s.missed_habit_penalty_base as f64 * 0.5).round() as i64,
            _ => s.missed_habit_penalty_base,
        };
    }

    sqlx::query("DELETE FROM habit_misses WHERE missed_date <= ?1")
        .bind(date)
        .execute(&mut *conn)
        .await?;

    Ok(sum)
}

/// True when the `reset_days` window ending at `date` carries no penalty.
/// The row for `date` is not yet written when this runs; the caller knows
/// its total is zero. Absent rows count as clean.
async fn clean_window(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    reset_days: i64,
) -> Result<bool, sqlx::Error> {
    let span = reset_days.max(1) - 1;
    if span == 0 {
        return Ok(true);
    }
    let from = date - Duration::days(span);
    let dirty: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM day_ledger WHERE date >= ?1 AND date < ?2 AND points_penalty > 0",
    )
    .bind(from)
    .bind(date)
    .fetch_one(&mut *conn)
    .await?;
    Ok(dirty == 0)
}

/// Finalize every effective date strictly between the penalty token and
/// `today`, oldest first, advancing the token after each.
pub async fn finalize_pending(
    conn: &mut SqliteConnection,
    s: &Settings,
    today: NaiveDate,
) -> AppResult<Vec<NaiveDate>> {
    let mut finalized = Vec::new();
    let Some(last) = s.last_penalty_date else {
        return Ok(finalized);
    };
    let mut d = last + Duration::days(1);
    while d < today {
        finalize_day(&mut *conn, s, d).await?;
        sqlx::query("UPDATE settings SET last_penalty_date = ?1 WHERE id = 1")
            .bind(d)
            .execute(&mut *conn)
            .await?;
        finalized.push(d);
        d += Duration::days(1);
    }
    Ok(finalized)
}

/// All-time score: the ledger is the source of truth, never a cached field.
pub async fn total_points(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COALESCE(SUM(daily_total), 0) FROM day_ledger")
        .fetch_one(&mut *conn)
        .await
}

/// Re-evaluate unachieved goals after a ledger mutation. The achieved
/// transition is monotonic; nothing here ever un-achieves a goal.
pub async fn check_goals(conn: &mut SqliteConnection, today: NaiveDate) -> AppResult<()> {
    let goals: Vec<Goal> = sqlx::query_as("SELECT * FROM goals WHERE achieved = 0")
        .fetch_all(&mut *conn)
        .await?;
    if goals.is_empty() {
        return Ok(());
    }

    let total = total_points(&mut *conn).await?;

    for goal in goals {
        let met = match goal.goal_type {
            GoalType::Points => goal.target_points.map(|t| total >= t).unwrap_or(false),
            GoalType::ProjectCompletion => match goal.project_name.as_deref() {
                Some(project) => {
                    let (items, open): (i64, i64) = sqlx::query_as(
                        r#"
                        SELECT COUNT(*), COALESCE(SUM(status != 'completed'), 0)
                        FROM work_items WHERE project = ?1
                        "#,
                    )
                    .bind(project)
                    .fetch_one(&mut *conn)
                    .await?;
                    items > 0 && open == 0
                }
                None => false,
            },
        };
        if met {
            sqlx::query("UPDATE goals SET achieved = 1, achieved_date = ?2 WHERE id = ?1")
                .bind(goal.id)
                .bind(today)
                .execute(&mut *conn)
                .await?;
            tracing::info!(goal_id = goal.id, "goal achieved");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_pool;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn settings(pool: &sqlx::SqlitePool) -> Settings {
        let mut conn = pool.acquire().await.unwrap();
        Settings::load(&mut conn).await.unwrap()
    }

    #[tokio::test]
    async fn test_task_reward_on_expected_time() {
        let pool = test_pool().await;
        let s = settings(&pool).await;
        // energy 3, exactly 3 * 20 * 60 seconds of work
        assert_eq!(task_reward(&s, 3, 3600), 12);
    }

    #[tokio::test]
    async fn test_task_reward_under_focus_threshold_halves() {
        let pool = test_pool().await;
        let s = settings(&pool).await;
        // 60s < min_work_time_seconds; energy 0 has no time expectation
        assert_eq!(task_reward(&s, 0, 60), 3); // round(10 * 0.6 * 1.0 * 0.5)
    }

    #[tokio::test]
    async fn test_time_quality_clamps() {
        let pool = test_pool().await;
        let s = settings(&pool).await;
        // Finishing early never pays above 1.0
        assert_eq!(time_quality(&s, 3, 600), 1.0);
        // A 5x overrun bottoms out at the floor
        assert_eq!(time_quality(&s, 1, 6000), MIN_TIME_QUALITY);
    }

    #[tokio::test]
    async fn test_skill_reward_streak_bonus() {
        let pool = test_pool().await;
        let s = settings(&pool).await;
        // Fifth consecutive day: streak entering the completion is 4
        assert_eq!(skill_reward(&s, 3, 4), 16);
        // No streak, no bonus
        assert_eq!(skill_reward(&s, 3, 0), 12);
    }

    #[tokio::test]
    async fn test_routine_reward_is_flat() {
        let pool = test_pool().await;
        let s = settings(&pool).await;
        assert_eq!(routine_reward(&s), 6);
    }

    #[tokio::test]
    async fn test_record_completion_updates_ledger() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();
        let d = date("2026-03-10");

        let ledger = record_completion(&mut conn, &s, d, false, 12).await.unwrap();
        assert_eq!(ledger.points_earned, 12);
        assert_eq!(ledger.tasks_completed, 1);
        assert_eq!(ledger.daily_total, 12);

        let ledger = record_completion(&mut conn, &s, d, true, 6).await.unwrap();
        assert_eq!(ledger.points_earned, 18);
        assert_eq!(ledger.habits_completed, 1);
    }

    #[tokio::test]
    async fn test_full_completion_bonus_paid_once() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();
        let d = date("2026-03-10");

        fetch_or_create_ledger(&mut conn, d).await.unwrap();
        sqlx::query("UPDATE day_ledger SET tasks_planned = 2 WHERE date = ?1")
            .bind(d)
            .execute(&mut *conn)
            .await
            .unwrap();

        record_completion(&mut conn, &s, d, false, 10).await.unwrap();
        // Second completion levels with the plan: 20 earned, +10% bonus
        let ledger = record_completion(&mut conn, &s, d, false, 10).await.unwrap();
        assert_eq!(ledger.points_earned, 22);

        // A habit completion afterwards must not re-trigger the bonus
        let ledger = record_completion(&mut conn, &s, d, true, 6).await.unwrap();
        assert_eq!(ledger.points_earned, 28);
    }

    #[tokio::test]
    async fn test_finalize_idle_day() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();

        let ledger = finalize_day(&mut conn, &s, date("2026-03-10")).await.unwrap();
        assert_eq!(ledger.points_penalty, 30);
        assert_eq!(ledger.daily_total, -30);
        assert_eq!(ledger.penalty_streak, 1);
    }

    #[tokio::test]
    async fn test_progressive_penalty_over_three_idle_days() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();

        let p1 = finalize_day(&mut conn, &s, date("2026-03-10")).await.unwrap();
        let p2 = finalize_day(&mut conn, &s, date("2026-03-11")).await.unwrap();
        let p3 = finalize_day(&mut conn, &s, date("2026-03-12")).await.unwrap();
        assert_eq!(p1.points_penalty, 30);
        assert_eq!(p2.points_penalty, 33);
        assert_eq!(p3.points_penalty, 36);
        assert_eq!(p3.penalty_streak, 3);
    }

    #[tokio::test]
    async fn test_rest_day_is_exempt_and_carries_streak() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();

        finalize_day(&mut conn, &s, date("2026-03-10")).await.unwrap();
        sqlx::query("INSERT INTO rest_days (date) VALUES ('2026-03-11')")
            .execute(&mut *conn)
            .await
            .unwrap();

        let rest = finalize_day(&mut conn, &s, date("2026-03-11")).await.unwrap();
        assert_eq!(rest.points_penalty, 0);
        assert_eq!(rest.penalty_streak, 1); // carried, not incremented

        // The streak picks back up the day after
        let next = finalize_day(&mut conn, &s, date("2026-03-12")).await.unwrap();
        assert_eq!(next.points_penalty, 33);
        assert_eq!(next.penalty_streak, 2);
    }

    #[tokio::test]
    async fn test_penalty_streak_resets_after_clean_window() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();

        finalize_day(&mut conn, &s, date("2026-03-10")).await.unwrap();

        // Two clean days: one task planned and completed on each
        for d in ["2026-03-11", "2026-03-12"] {
            sqlx::query(
                "INSERT INTO day_ledger (date, points_earned, daily_total, tasks_completed, tasks_planned, completion_rate) \
                 VALUES (?1, 12, 12, 1, 1, 1.0)",
            )
            .bind(date(d))
            .execute(&mut *conn)
            .await
            .unwrap();
        }

        let d1 = finalize_day(&mut conn, &s, date("2026-03-11")).await.unwrap();
        assert_eq!(d1.points_penalty, 0);
        assert_eq!(d1.penalty_streak, 1); // window not clean yet (03-10 was dirty)

        let d2 = finalize_day(&mut conn, &s, date("2026-03-12")).await.unwrap();
        assert_eq!(d2.penalty_streak, 0); // 03-11 and 03-12 both clean
    }

    #[tokio::test]
    async fn test_incomplete_day_penalties() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();

        // Half done: below the 0.6 threshold but above severe
        sqlx::query(
            "INSERT INTO day_ledger (date, points_earned, daily_total, tasks_completed, tasks_planned) \
             VALUES ('2026-03-10', 10, 10, 2, 4)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        let l = finalize_day(&mut conn, &s, date("2026-03-10")).await.unwrap();
        assert_eq!(l.points_penalty, 5); // round(10 * (1 - 0.5))

        // One of four done: below severe threshold
        sqlx::query(
            "INSERT INTO day_ledger (date, points_earned, daily_total, tasks_completed, tasks_planned) \
             VALUES ('2026-03-11', 5, 5, 1, 4)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        let l = finalize_day(&mut conn, &s, date("2026-03-11")).await.unwrap();
        // severe 15, progressive multiplier 1.1 from the prior penalty day
        assert_eq!(l.points_penalty, 17);
    }

    #[tokio::test]
    async fn test_good_day_bonus_at_finalize() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();

        sqlx::query(
            "INSERT INTO day_ledger (date, points_earned, daily_total, tasks_completed, tasks_planned, completion_rate) \
             VALUES ('2026-03-10', 40, 40, 4, 5, 0.8)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        let l = finalize_day(&mut conn, &s, date("2026-03-10")).await.unwrap();
        assert_eq!(l.points_earned, 42); // +round(40 * 0.05)
        assert_eq!(l.points_penalty, 0); // 0.8 is not below the 0.6 threshold
    }

    #[tokio::test]
    async fn test_missed_habit_penalties() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();
        let d = date("2026-03-10");

        // A skill habit still sitting overdue in the store
        sqlx::query(
            "INSERT INTO work_items (description, is_habit, habit_type, status, due_date, created_at, recur_kind) \
             VALUES ('practice guitar', 1, 'skill', 'pending', '2026-03-10', '2026-03-01T00:00:00Z', 'daily')",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        // A routine whose miss was recorded by the purge
        let routine_id = sqlx::query(
            "INSERT INTO work_items (description, is_habit, habit_type, status, due_date, created_at, recur_kind) \
             VALUES ('floss', 1, 'routine', 'pending', '2026-03-12', '2026-03-01T00:00:00Z', 'daily')",
        )
        .execute(&mut *conn)
        .await
        .unwrap()
        .last_insert_rowid();
        sqlx::query("INSERT INTO habit_misses (item_id, missed_date) VALUES (?1, '2026-03-10')")
            .bind(routine_id)
            .execute(&mut *conn)
            .await
            .unwrap();
        // Completing something keeps the idle penalty out of the way
        record_completion(&mut conn, &s, d, false, 12).await.unwrap();

        let l = finalize_day(&mut conn, &s, d).await.unwrap();
        // skill 15 + routine round(15 * 0.5) = 8
        assert_eq!(l.points_penalty, 23);

        let leftover: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM habit_misses")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_finalize_pending_walks_forward_and_is_idempotent() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("UPDATE settings SET last_penalty_date = '2026-03-09' WHERE id = 1")
            .execute(&mut *conn)
            .await
            .unwrap();
        let s = Settings::load(&mut conn).await.unwrap();

        let done = finalize_pending(&mut conn, &s, date("2026-03-12")).await.unwrap();
        assert_eq!(done, vec![date("2026-03-10"), date("2026-03-11")]);

        let s = Settings::load(&mut conn).await.unwrap();
        assert_eq!(s.last_penalty_date, Some(date("2026-03-11")));
        let again = finalize_pending(&mut conn, &s, date("2026-03-12")).await.unwrap();
        assert!(again.is_empty());

        // A direct second finalize of a closed date is rejected
        let err = finalize_day(&mut conn, &s, date("2026-03-11")).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn test_points_goal_achieved_monotonically() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();
        let d = date("2026-03-10");

        sqlx::query(
            "INSERT INTO goals (goal_type, target_points, reward_description, created_at) \
             VALUES ('points', 20, 'new headphones', '2026-03-01T00:00:00Z')",
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        record_completion(&mut conn, &s, d, false, 12).await.unwrap();
        let achieved: bool = sqlx::query_scalar("SELECT achieved FROM goals WHERE id = 1")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert!(!achieved);

        record_completion(&mut conn, &s, d, false, 12).await.unwrap();
        let (achieved, achieved_date): (bool, Option<NaiveDate>) =
            sqlx::query_as("SELECT achieved, achieved_date FROM goals WHERE id = 1")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert!(achieved);
        assert_eq!(achieved_date, Some(d));
    }

    #[tokio::test]
    async fn test_project_goal_achieved_when_all_items_complete() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let s = Settings::load(&mut conn).await.unwrap();
        let d = date("2026-03-10");

        sqlx::query(
            "INSERT INTO goals (goal_type, project_name, reward_description, created_at) \
             VALUES ('project_completion', 'thesis', 'weekend off', '2026-03-01T00:00:00Z')",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO work_items (description, project, status, created_at) \
             VALUES ('draft chapter', 'thesis', 'completed', '2026-03-01T00:00:00Z'), \
                    ('revise chapter', 'thesis', 'pending', '2026-03-01T00:00:00Z')",
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        check_goals(&mut conn, d).await.unwrap();
        let achieved: bool = sqlx::query_scalar("SELECT achieved FROM goals WHERE id = 1")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert!(!achieved);

        sqlx::query("UPDATE work_items SET status = 'completed' WHERE description = 'revise chapter'")
            .execute(&mut *conn)
            .await
            .unwrap();
        check_goals(&mut conn, d).await.unwrap();
        let achieved: bool = sqlx::query_scalar("SELECT achieved FROM goals WHERE id = 1")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert!(achieved);
    }
}
