use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    Json,
};
use chrono::Utc;

use crate::core::backup;
use crate::error::{AppError, AppResult};
use crate::models::backup::{BackupRecord, BackupType};
use crate::AppState;

pub async fn list_backups(State(state): State<AppState>) -> AppResult<Json<Vec<BackupRecord>>> {
    let backups =
        sqlx::query_as::<_, BackupRecord>("SELECT * FROM backups ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?;
    Ok(Json(backups))
}

pub async fn create_backup(State(state): State<AppState>) -> AppResult<Json<BackupRecord>> {
    let record =
        backup::create_backup(&state.db, &state.config, BackupType::Manual, Utc::now()).await?;
    Ok(Json(record))
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    backup::delete_backup(&state.db, &state.config, id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn download_backup(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<(HeaderMap, Vec<u8>)> {
    let record: BackupRecord = sqlx::query_as("SELECT * FROM backups WHERE id = ?1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Backup {id} not found")))?;

    let path = backup::backup_path(&state.config, &record.filename);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::Backup(format!("Could not read {}: {e}", record.filename)))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", record.filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok((headers, bytes))
}
