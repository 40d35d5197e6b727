//! In-memory [`Store`] implementation.
//!
//! Collections are `BTreeMap`s behind a `std::sync::RwLock`, which keeps
//! `list` ordered by key without a sort.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HubError, HubResult};

use super::Store;

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// In-memory store for tests and file-less runs.
pub struct InMemoryStore {
    collections: RwLock<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> HubError {
    HubError::Storage("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, collection: &str, key: &str, value: Value) -> HubResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> HubResult<Option<Value>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn delete(&self, collection: &str, key: &str) -> HubResult<bool> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        Ok(collections
            .get_mut(collection)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, collection: &str, prefix: Option<&str>) -> HubResult<Vec<(String, Value)>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
