use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::backup::{BackupRecord, BackupType};

pub fn backup_path(config: &Config, filename: &str) -> PathBuf {
    Path::new(&config.backup_dir).join(filename)
}

/// Snapshot the live database into the backup directory. `VACUUM INTO`
/// gives a consistent copy while the pool stays open, which a plain file
/// copy of an attached SQLite database would not.
pub async fn create_backup(
    pool: &SqlitePool,
    config: &Config,
    kind: BackupType,
    now: DateTime<Utc>,
) -> AppResult<BackupRecord> {
    tokio::fs::create_dir_all(&config.backup_dir)
        .await
        .map_err(|e| AppError::Backup(format!("Cannot create backup directory: {e}")))?;

    let filename = format!("momentum-{}.sqlite", now.format("%Y%m%d-%H%M%S"));
    let path = backup_path(config, &filename);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::Backup(format!("Backup {filename} already exists")));
    }

    let escaped = path.display().to_string().replace('\'', "''");
    sqlx::query(&format!("VACUUM INTO '{escaped}'"))
        .execute(pool)
        .await
        .map_err(|e| AppError::Backup(format!("Snapshot failed: {e}")))?;

    let size_bytes = tokio::fs::metadata(&path)
        .await
        .map(|m| m.len() as i64)
        .unwrap_or(0);

    let record = sqlx::query_as::<_, BackupRecord>(
        "INSERT INTO backups (filename, created_at, size_bytes, backup_type) VALUES (?1, ?2, ?3, ?4) RETURNING *",
    )
    .bind(&filename)
    .bind(now)
    .bind(size_bytes)
    .bind(kind)
    .fetch_one(pool)
    .await?;

    tracing::info!(file = %record.filename, size_bytes, "backup created");
    Ok(record)
}

/// Drop the oldest automatic backups beyond `keep`. Manual backups are
/// the operator's to delete.
pub async fn prune_auto_backups(pool: &SqlitePool, config: &Config, keep: i64) -> AppResult<u64> {
    let stale: Vec<BackupRecord> = sqlx::query_as(
        "SELECT * FROM backups WHERE backup_type = 'auto' ORDER BY created_at DESC LIMIT -1 OFFSET ?1",
    )
    .bind(keep.max(0))
    .fetch_all(pool)
    .await?;

    let mut pruned = 0;
    for record in stale {
        let path = backup_path(config, &record.filename);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(file = %record.filename, error = %e, "could not remove backup file");
            }
        }
        sqlx::query("DELETE FROM backups WHERE id = ?1")
            .bind(record.id)
            .execute(pool)
            .await?;
        pruned += 1;
    }
    Ok(pruned)
}

pub async fn delete_backup(pool: &SqlitePool, config: &Config, id: i64) -> AppResult<()> {
    let record: BackupRecord = sqlx::query_as("SELECT * FROM backups WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Backup {id} not found")))?;

    let path = backup_path(config, &record.filename);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(AppError::Backup(format!("Could not remove {}: {e}", record.filename)));
        }
    }
    sqlx::query("DELETE FROM backups WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
