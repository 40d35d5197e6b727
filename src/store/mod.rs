//! Storage abstraction.
//!
//! The [`Store`] trait is a minimal document store: JSON values keyed by
//! `(collection, key)`. Every component receives an `Arc<dyn Store>` at
//! construction, so swapping the in-memory backend for SQLite (or anything
//! else that can do per-record atomic writes) touches no core logic.
//!
//! | Collection | Key | Record |
//! |------------|-----|--------|
//! | `entries:<source_type>` | entry id | [`KnowledgeEntry`](crate::models::KnowledgeEntry) |
//! | `sessions` | session id | [`DiagnosticSession`](crate::models::DiagnosticSession) |
//! | `interactions` | `<session id>/<sequence>` | [`SearchInteraction`](crate::models::SearchInteraction) |
//! | `feedback` | feedback id | [`FeedbackRecord`](crate::models::FeedbackRecord) |
//! | `effectiveness` | source type | [`SourceEffectiveness`](crate::models::SourceEffectiveness) |
//! | `ingested` | `<source_type>/<sha256>` | ingest marker, see [`crate::ingest`] |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::HubResult;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

pub const SESSIONS: &str = "sessions";
pub const INTERACTIONS: &str = "interactions";
pub const FEEDBACK: &str = "feedback";
pub const EFFECTIVENESS: &str = "effectiveness";

/// Abstract record store.
///
/// Writes are atomic per record. `list` returns records ordered by key.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, collection: &str, key: &str, value: Value) -> HubResult<()>;

    async fn get(&self, collection: &str, key: &str) -> HubResult<Option<Value>>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, collection: &str, key: &str) -> HubResult<bool>;

    /// List `(key, value)` pairs, optionally restricted to keys starting with `prefix`.
    async fn list(&self, collection: &str, prefix: Option<&str>) -> HubResult<Vec<(String, Value)>>;
}

pub async fn put_record<T: Serialize + Sync>(
    store: &dyn Store,
    collection: &str,
    key: &str,
    record: &T,
) -> HubResult<()> {
    let value = serde_json::to_value(record)?;
    store.put(collection, key, value).await
}

pub async fn get_record<T: DeserializeOwned>(
    store: &dyn Store,
    collection: &str,
    key: &str,
) -> HubResult<Option<T>> {
    match store.get(collection, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn list_records<T: DeserializeOwned>(
    store: &dyn Store,
    collection: &str,
    prefix: Option<&str>,
) -> HubResult<Vec<T>> {
    store
        .list(collection, prefix)
        .await?
        .into_iter()
        .map(|(_, value)| -> HubResult<T> { Ok(serde_json::from_value(value)?) })
        .collect()
}
