//! SQLite-backed [`Store`] using `sqlx`.
//!
//! All collections share one `records` table; each `put` is a single
//! upsert statement, so writes are atomic per record.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::error::HubResult;
use crate::migrate;

use super::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> HubResult<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put(&self, collection: &str, key: &str, value: Value) -> HubResult<()> {
        let json = serde_json::to_string(&value)?;
        sqlx::query(
            r#"
            INSERT INTO records (collection, key, value_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(collection, key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> HubResult<Option<Value>> {
        let row = sqlx::query("SELECT value_json FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("value_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> HubResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, collection: &str, prefix: Option<&str>) -> HubResult<Vec<(String, Value)>> {
        let rows = match prefix {
            Some(p) => {
                // substr() rather than LIKE so '%' and '_' in keys are literal
                sqlx::query(
                    "SELECT key, value_json FROM records WHERE collection = ? AND substr(key, 1, ?) = ? ORDER BY key ASC",
                )
                .bind(collection)
                .bind(p.chars().count() as i64)
                .bind(p)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT key, value_json FROM records WHERE collection = ? ORDER BY key ASC",
                )
                .bind(collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| -> HubResult<(String, Value)> {
                let key: String = row.get("key");
                let json: String = row.get("value_json");
                Ok((key, serde_json::from_str(&json)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_round_trip_and_prefix() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data").join("kfuse.sqlite"))
            .await
            .unwrap();

        store.put("c", "a/1", json!({"n": 1})).await.unwrap();
        store.put("c", "a/2", json!({"n": 2})).await.unwrap();
        store.put("c", "b/1", json!({"n": 3})).await.unwrap();
        store.put("c", "a/1", json!({"n": 10})).await.unwrap();

        assert_eq!(store.get("c", "a/1").await.unwrap(), Some(json!({"n": 10})));
        let a = store.list("c", Some("a/")).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].0, "a/1");

        assert!(store.delete("c", "b/1").await.unwrap());
        assert_eq!(store.list("c", None).await.unwrap().len(), 2);
        store.close().await;
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kfuse.sqlite");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put("sessions", "s1", json!({"id": "s1"})).await.unwrap();
            store.close().await;
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(
            store.get("sessions", "s1").await.unwrap(),
            Some(json!({"id": "s1"}))
        );
        store.close().await;
    }
}
