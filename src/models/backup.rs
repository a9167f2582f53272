use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Auto,
    Manual,
}

/// Metadata for one database snapshot. The file itself lives in the
/// configured backup directory; this row is what the engine owns.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BackupRecord {
    pub id: i64,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub backup_type: BackupType,
    pub uploaded_offsite: bool,
}
