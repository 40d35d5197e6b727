//! Documentation adapter (`documentation`): runbooks, guides, references.
//!
//! Extra filter: `category`.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::collection::EntryCollection;
use super::scoring::{FieldWeights, KeywordScorer, RelevanceScorer};
use super::{
    matches_common_filters, matches_metadata_filters, rank_entries, AdapterHit, Filters,
    SourceAdapter,
};
use crate::error::HubResult;
use crate::models::{KnowledgeEntry, NewKnowledgeEntry, SourceType};
use crate::store::Store;

const FILTER_KEYS: &[&str] = &["category"];

pub struct DocsAdapter {
    entries: EntryCollection,
    scorer: Arc<dyn RelevanceScorer>,
}

impl DocsAdapter {
    pub fn new(store: Arc<dyn Store>, default_confidence: f64) -> Self {
        Self::with_scorer(
            store,
            default_confidence,
            Arc::new(KeywordScorer::new(FieldWeights {
                title: 3.0,
                tags: 2.0,
                services: 1.5,
                metadata: 0.5,
                content: 1.5,
            })),
        )
    }

    pub fn with_scorer(
        store: Arc<dyn Store>,
        default_confidence: f64,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Self {
        Self {
            entries: EntryCollection::new(store, SourceType::Documentation, default_confidence),
            scorer,
        }
    }
}

#[async_trait]
impl SourceAdapter for DocsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Documentation
    }

    fn description(&self) -> &str {
        "Runbooks, guides, and reference documentation"
    }

    async fn search(
        &self,
        query: &str,
        filters: &Filters,
        limit: usize,
    ) -> HubResult<Vec<AdapterHit>> {
        let mut candidates = Vec::new();
        for entry in self.entries.all().await? {
            if matches_common_filters(&entry, filters)?
                && matches_metadata_filters(&entry, filters, FILTER_KEYS)
            {
                candidates.push(entry);
            }
        }
        Ok(rank_entries(candidates, query, self.scorer.as_ref(), limit))
    }

    async fn get(&self, id: &str) -> HubResult<KnowledgeEntry> {
        self.entries.get(id).await
    }

    async fn add(&self, entry: NewKnowledgeEntry) -> HubResult<String> {
        Ok(self.entries.add(entry).await?.id)
    }

    async fn update(&self, entry: KnowledgeEntry) -> HubResult<KnowledgeEntry> {
        self.entries.update(entry).await
    }

    async fn list_categories(&self) -> HubResult<BTreeSet<String>> {
        self.entries.categories(Some("category")).await
    }

    async fn count(&self) -> HubResult<usize> {
        self.entries.count().await
    }
}
