//! Incident case adapter (`salesforce_case`).
//!
//! Cases are matched mostly on affected services and tags; the resolution
//! notes in `metadata.resolution` feed response suggestions.
//!
//! Extra filters: `status`, `severity`, `case_type`.

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

const FILTER_KEYS: &[&str] = &["status", "severity", "case_type"];

pub struct CaseAdapter {
    entries: EntryCollection,
    scorer: Arc<dyn RelevanceScorer>,
}

impl CaseAdapter {
    pub fn new(store: Arc<dyn Store>, default_confidence: f64) -> Self {
        Self::with_scorer(
            store,
            default_confidence,
            Arc::new(KeywordScorer::new(FieldWeights {
                title: 3.0,
                tags: 2.5,
                services: 2.5,
                metadata: 1.0,
                content: 1.0,
            })),
        )
    }

    pub fn with_scorer(
        store: Arc<dyn Store>,
        default_confidence: f64,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Self {
        Self {
            entries: EntryCollection::new(store, SourceType::SalesforceCase, default_confidence),
            scorer,
        }
    }
}

#[async_trait]
impl SourceAdapter for CaseAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::SalesforceCase
    }

    fn description(&self) -> &str {
        "Incident cases with symptoms, affected services, and resolutions"
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
        self.entries.categories(Some("case_type")).await
    }

    async fn count(&self) -> HubResult<usize> {
        self.entries.count().await
    }
}
