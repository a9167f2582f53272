use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Open (creating if needed) the local database file. Writes serialize on
/// SQLite's own lock; a handful of connections covers concurrent reads.
pub async fn create_pool(database_path: &str) -> SqlitePool {
    if let Some(parent) = Path::new(database_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&format!("sqlite:{database_path}?mode=rwc"))
        .await
        .expect("Failed to open database")
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// In-memory database with the full schema and a default settings row,
/// with no penalty token so tests can finalize arbitrary dates.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    run_migrations(&pool).await.expect("migrations");
    sqlx::query("INSERT INTO settings (id) VALUES (1)")
        .execute(&pool)
        .await
        .expect("settings row");
    pool
}
