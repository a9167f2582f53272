use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{watch, RwLock};

use crate::config::Config;
use crate::core::{backup, dates, planner, scoring};
use crate::error::{AppError, AppResult};
use crate::models::backup::BackupType;
use crate::models::settings::Settings;

/// Tick period. Schedule times are minute-granular, so half a minute
/// keeps every job within one minute of its configured time.
pub const TICK_SECONDS: u64 = 30;

/// Heartbeat counters for one job. Process-local and reset on restart;
/// the persisted `last_*` dates in Settings are what guarantee
/// at-most-once execution, not these.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total_checks: u64,
    pub total_executions: u64,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub consecutive_errors: u32,
    pub next_fire_time: Option<NaiveDateTime>,
}

impl JobStats {
    fn checked(&mut self, now: DateTime<Utc>) {
        self.total_checks += 1;
        self.last_check_time = Some(now);
    }

    fn executed(&mut self, now: DateTime<Utc>) {
        self.total_executions += 1;
        self.last_execution_time = Some(now);
        self.last_error_message = None;
        self.consecutive_errors = 0;
    }

    fn failed(&mut self, message: String) {
        if self.last_error_message.as_deref() == Some(message.as_str()) {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 1;
        }
        self.last_error_message = Some(message);
    }

    /// The same failure twice in a row is the operator-visible ERROR state.
    pub fn in_error_state(&self) -> bool {
        self.consecutive_errors >= 2
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub auto_penalty: JobStats,
    pub auto_roll: JobStats,
    pub auto_backup: JobStats,
}

pub type SharedStatus = Arc<RwLock<SchedulerStatus>>;

pub fn shared_status() -> SharedStatus {
    Arc::new(RwLock::new(SchedulerStatus::default()))
}

fn next_fire(now_local: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today_at = now_local.date().and_time(at);
    if now_local < today_at {
        today_at
    } else {
        today_at + Duration::days(1)
    }
}

/// Run the ticker until the shutdown signal flips. A job that is mid-run
/// when the signal arrives finishes; the loop only exits between ticks.
pub fn spawn(
    pool: SqlitePool,
    config: Arc<Config>,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_SECONDS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(period_secs = TICK_SECONDS, "scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick_once(&pool, &config, &status, Local::now().naive_local(), Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("scheduler stopped");
                    break;
                }
            }
        }
    })
}

/// One pass over the three jobs. Each job's failure is caught and
/// recorded; its idempotence token stays put so the next tick retries.
pub(crate) async fn tick_once(
    pool: &SqlitePool,
    config: &Config,
    status: &SharedStatus,
    now_local: NaiveDateTime,
    now_utc: DateTime<Utc>,
) {
    let s = {
        let mut conn = match pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "scheduler could not reach the store");
                return;
            }
        };
        match Settings::load(&mut conn).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "scheduler could not load settings");
                return;
            }
        }
    };
    let today = match dates::effective_for(&s, now_local) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "bad day-start time in settings");
            return;
        }
    };

    // Surface an overdue roll to the operator when auto-roll is off.
    if !s.auto_roll_enabled && !s.pending_roll {
        let roll_open = dates::parse_hhmm(&s.roll_available_time)
            .map(|t| now_local.time() >= t)
            .unwrap_or(true);
        let roll_due = s.last_roll_date.map(|d| d < today).unwrap_or(true);
        if roll_open && roll_due {
            if let Err(e) = sqlx::query("UPDATE settings SET pending_roll = 1 WHERE id = 1")
                .execute(pool)
                .await
            {
                tracing::error!(error = %e, "could not raise pending_roll");
            }
        }
    }

    // auto_penalty
    let due = {
        let mut st = status.write().await;
        st.auto_penalty.checked(now_utc);
        match dates::parse_hhmm(&s.penalty_time) {
            Ok(at) => {
                st.auto_penalty.next_fire_time = Some(next_fire(now_local, at));
                s.auto_penalties_enabled
                    && now_local.time() >= at
                    && s
                        .last_penalty_date
                        .map(|d| d < today - Duration::days(1))
                        .unwrap_or(true)
            }
            Err(e) => {
                st.auto_penalty.failed(e.to_string());
                false
            }
        }
    };
    if due {
        match run_penalties(pool, now_local).await {
            Ok(finalized) => {
                tracing::info!(finalized, "auto-penalty pass complete");
                status.write().await.auto_penalty.executed(now_utc);
            }
            Err(e) => {
                tracing::error!(error = %e, "auto-penalty failed");
                status.write().await.auto_penalty.failed(e.to_string());
            }
        }
    }

    // auto_roll
    let due = {
        let mut st = status.write().await;
        st.auto_roll.checked(now_utc);
        match dates::parse_hhmm(&s.auto_roll_time) {
            Ok(at) => {
                st.auto_roll.next_fire_time = Some(next_fire(now_local, at));
                s.auto_roll_enabled
                    && now_local.time() >= at
                    && s.last_roll_date.map(|d| d < today).unwrap_or(true)
            }
            Err(e) => {
                st.auto_roll.failed(e.to_string());
                false
            }
        }
    };
    if due {
        match run_roll(pool, now_local).await {
            Ok(()) => {
                tracing::info!("auto-roll complete");
                status.write().await.auto_roll.executed(now_utc);
            }
            Err(e) => {
                tracing::error!(error = %e, "auto-roll failed");
                status.write().await.auto_roll.failed(e.to_string());
            }
        }
    }

    // auto_backup
    let due = {
        let mut st = status.write().await;
        st.auto_backup.checked(now_utc);
        match dates::parse_hhmm(&s.backup_time) {
            Ok(at) => {
                st.auto_backup.next_fire_time = Some(next_fire(now_local, at));
                let interval_elapsed = s
                    .last_backup_date
                    .map(|d| (today - d).num_days() >= s.backup_interval_days)
                    .unwrap_or(true);
                s.auto_backup_enabled && now_local.time() >= at && interval_elapsed
            }
            Err(e) => {
                st.auto_backup.failed(e.to_string());
                false
            }
        }
    };
    if due {
        match run_backup(pool, config, today, now_utc).await {
            Ok(()) => {
                status.write().await.auto_backup.executed(now_utc);
            }
            Err(e) => {
                tracing::error!(error = %e, "auto-backup failed");
                status.write().await.auto_backup.failed(e.to_string());
            }
        }
    }
}

async fn run_penalties(pool: &SqlitePool, now_local: NaiveDateTime) -> AppResult<usize> {
    let mut tx = pool.begin().await?;
    let s = Settings::load(&mut tx).await?;
    let today = dates::effective_for(&s, now_local)?;
    let finalized = match scoring::finalize_pending(&mut tx, &s, today).await {
        Ok(dates) => dates,
        // Lost the race against an operator-triggered roll: nothing to do.
        Err(AppError::AlreadyFinalized(_)) => Vec::new(),
        Err(e) => return Err(e),
    };
    tx.commit().await?;
    Ok(finalized.len())
}

async fn run_roll(pool: &SqlitePool, now_local: NaiveDateTime) -> AppResult<()> {
    run_penalties(pool, now_local).await?;
    match planner::roll(pool, None, now_local).await {
        Ok(_) => Ok(()),
        Err(AppError::RollAlreadyDone) => Ok(()),
        Err(e) => Err(e),
    }
}

async fn run_backup(
    pool: &SqlitePool,
    config: &Config,
    today: chrono::NaiveDate,
    now_utc: DateTime<Utc>,
) -> AppResult<()> {
    let record = backup::create_backup(pool, config, BackupType::Auto, now_utc).await?;
    sqlx::query("UPDATE settings SET last_backup_date = ?1 WHERE id = 1")
        .bind(today)
        .execute(pool)
        .await?;
    let keep: i64 = sqlx::query_scalar("SELECT backup_keep_local_count FROM settings WHERE id = 1")
        .fetch_one(pool)
        .await?;
    let pruned = backup::prune_auto_backups(pool, config, keep).await?;
    tracing::info!(file = %record.filename, pruned, "auto-backup complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_pool;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(day: &str, time: &str) -> NaiveDateTime {
        date(day).and_time(NaiveTime::parse_from_str(time, "%H:%M").unwrap())
    }

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            database_path: ":memory:".into(),
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: "http://localhost:3000".into(),
            backup_dir: dir.to_string_lossy().into_owned(),
            api_key: None,
        }
    }

    #[test]
    fn test_next_fire_rolls_to_tomorrow_after_the_hour() {
        let t = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        assert_eq!(next_fire(at("2026-03-10", "01:00"), t), at("2026-03-10", "03:00"));
        assert_eq!(next_fire(at("2026-03-10", "04:00"), t), at("2026-03-11", "03:00"));
    }

    #[test]
    fn test_error_state_needs_two_identical_failures() {
        let mut stats = JobStats::default();
        stats.failed("db locked".into());
        assert!(!stats.in_error_state());
        stats.failed("db locked".into());
        assert!(stats.in_error_state());
        stats.failed("disk full".into());
        assert!(!stats.in_error_state());
        stats.executed(Utc::now());
        assert_eq!(stats.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_penalty_job_fires_once_per_day() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let status = shared_status();
        sqlx::query("UPDATE settings SET last_penalty_date = '2026-03-07' WHERE id = 1")
            .execute(&pool)
            .await
            .unwrap();

        tick_once(&pool, &config, &status, at("2026-03-10", "12:00"), Utc::now()).await;
        let s = {
            let mut conn = pool.acquire().await.unwrap();
            Settings::load(&mut conn).await.unwrap()
        };
        assert_eq!(s.last_penalty_date, Some(date("2026-03-09")));
        assert_eq!(status.read().await.auto_penalty.total_executions, 1);

        // Caught up: the next tick checks but does not execute.
        tick_once(&pool, &config, &status, at("2026-03-10", "12:01"), Utc::now()).await;
        let st = status.read().await;
        assert_eq!(st.auto_penalty.total_executions, 1);
        assert_eq!(st.auto_penalty.total_checks, 2);
    }

    #[tokio::test]
    async fn test_penalty_job_waits_for_its_hour() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let status = shared_status();
        sqlx::query(
            "UPDATE settings SET last_penalty_date = '2026-03-08', penalty_time = '09:00' WHERE id = 1",
        )
        .execute(&pool)
        .await
        .unwrap();

        tick_once(&pool, &config, &status, at("2026-03-10", "08:59"), Utc::now()).await;
        assert_eq!(status.read().await.auto_penalty.total_executions, 0);

        tick_once(&pool, &config, &status, at("2026-03-10", "09:00"), Utc::now()).await;
        assert_eq!(status.read().await.auto_penalty.total_executions, 1);
    }

    #[tokio::test]
    async fn test_auto_roll_runs_penalties_then_rolls() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let status = shared_status();
        sqlx::query(
            "UPDATE settings SET auto_roll_enabled = 1, last_penalty_date = '2026-03-08' WHERE id = 1",
        )
        .execute(&pool)
        .await
        .unwrap();

        tick_once(&pool, &config, &status, at("2026-03-10", "06:30"), Utc::now()).await;
        let s = {
            let mut conn = pool.acquire().await.unwrap();
            Settings::load(&mut conn).await.unwrap()
        };
        assert_eq!(s.last_roll_date, Some(date("2026-03-10")));
        assert_eq!(s.last_penalty_date, Some(date("2026-03-09")));
        assert_eq!(status.read().await.auto_roll.total_executions, 1);
    }

    #[tokio::test]
    async fn test_pending_roll_raised_when_auto_roll_disabled() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let status = shared_status();

        tick_once(&pool, &config, &status, at("2026-03-10", "12:00"), Utc::now()).await;
        let pending: bool = sqlx::query_scalar("SELECT pending_roll FROM settings WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(pending);
    }

    #[tokio::test]
    async fn test_backup_job_respects_interval() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let status = shared_status();
        sqlx::query("UPDATE settings SET last_backup_date = '2026-03-10' WHERE id = 1")
            .execute(&pool)
            .await
            .unwrap();

        // One day later: the 1-day interval has elapsed
        tick_once(&pool, &config, &status, at("2026-03-11", "03:30"), Utc::now()).await;
        assert_eq!(status.read().await.auto_backup.total_executions, 1);
        let s = {
            let mut conn = pool.acquire().await.unwrap();
            Settings::load(&mut conn).await.unwrap()
        };
        assert_eq!(s.last_backup_date, Some(date("2026-03-11")));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
