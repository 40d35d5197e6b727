//! Schema for the SQLite store. Idempotent.

use sqlx::SqlitePool;

use crate::error::HubResult;

pub async fn run_migrations(pool: &SqlitePool) -> HubResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            key TEXT NOT NULL,
            value_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(collection, updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
