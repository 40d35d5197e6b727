//! Store-backed entry collection shared by the built-in adapters.
//!
//! Owns identifier assignment, timestamps, default confidence, and
//! validation. Caller-supplied fields are stored verbatim.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{HubError, HubResult};
use crate::models::{KnowledgeEntry, NewKnowledgeEntry, SourceType};
use crate::store::{get_record, list_records, put_record, Store};

#[derive(Clone)]
pub struct EntryCollection {
    store: Arc<dyn Store>,
    source_type: SourceType,
    collection: String,
    default_confidence: f64,
}

impl EntryCollection {
    pub fn new(store: Arc<dyn Store>, source_type: SourceType, default_confidence: f64) -> Self {
        Self {
            store,
            source_type,
            collection: source_type.collection(),
            default_confidence,
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    /// Validate and persist a new entry, returning its assigned id.
    pub async fn add(&self, new: NewKnowledgeEntry) -> HubResult<KnowledgeEntry> {
        if new.title.trim().is_empty() {
            return Err(HubError::validation("entry title must not be empty"));
        }
        let confidence = match new.confidence {
            Some(c) if !(0.0..=1.0).contains(&c) => {
                return Err(HubError::validation(format!(
                    "confidence must be in [0, 1], got {}",
                    c
                )))
            }
            Some(c) => c,
            None => self.default_confidence,
        };

        let now = Utc::now();
        let entry = KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            source_type: self.source_type,
            title: new.title,
            content: new.content,
            tags: new.tags,
            affected_services: new.affected_services,
            created_date: now,
            updated_date: now,
            confidence,
            metadata: new.metadata,
        };

        put_record(self.store.as_ref(), &self.collection, &entry.id, &entry).await?;
        Ok(entry)
    }

    pub async fn get(&self, id: &str) -> HubResult<KnowledgeEntry> {
        get_record(self.store.as_ref(), &self.collection, id)
            .await?
            .ok_or_else(|| HubError::not_found("entry", id))
    }

    /// Replace an existing entry's content, keeping its id and creation date.
    pub async fn update(&self, entry: KnowledgeEntry) -> HubResult<KnowledgeEntry> {
        if entry.source_type != self.source_type {
            return Err(HubError::validation(format!(
                "entry belongs to {}, not {}",
                entry.source_type, self.source_type
            )));
        }
        if !(0.0..=1.0).contains(&entry.confidence) {
            return Err(HubError::validation(format!(
                "confidence must be in [0, 1], got {}",
                entry.confidence
            )));
        }
        let existing = self.get(&entry.id).await?;
        let updated = KnowledgeEntry {
            created_date: existing.created_date,
            updated_date: Utc::now(),
            ..entry
        };
        put_record(self.store.as_ref(), &self.collection, &updated.id, &updated).await?;
        Ok(updated)
    }

    pub async fn all(&self) -> HubResult<Vec<KnowledgeEntry>> {
        list_records(self.store.as_ref(), &self.collection, None).await
    }

    pub async fn count(&self) -> HubResult<usize> {
        Ok(self.store.list(&self.collection, None).await?.len())
    }

    /// Tags plus the values of `category_key` in entry metadata.
    pub async fn categories(&self, category_key: Option<&str>) -> HubResult<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for entry in self.all().await? {
            out.extend(entry.tags.iter().cloned());
            if let Some(value) = category_key.and_then(|k| entry.metadata_str(k)) {
                out.insert(value);
            }
        }
        Ok(out)
    }
}
