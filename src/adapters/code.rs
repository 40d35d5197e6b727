//! Code and commit knowledge adapter (`code_knowledge`).
//!
//! Entries describe fixes, modules, or commits; file paths, function names
//! and commit messages live in metadata, which this adapter weights highest.
//!
//! Extra filters: `repository`, `language`.

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

const FILTER_KEYS: &[&str] = &["repository", "language"];

pub struct CodeAdapter {
    entries: EntryCollection,
    scorer: Arc<dyn RelevanceScorer>,
}

impl CodeAdapter {
    pub fn new(store: Arc<dyn Store>, default_confidence: f64) -> Self {
        Self::with_scorer(
            store,
            default_confidence,
            Arc::new(KeywordScorer::new(FieldWeights {
                title: 2.0,
                tags: 2.0,
                services: 2.0,
                metadata: 3.0,
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
            entries: EntryCollection::new(store, SourceType::CodeKnowledge, default_confidence),
            scorer,
        }
    }
}

#[async_trait]
impl SourceAdapter for CodeAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::CodeKnowledge
    }

    fn description(&self) -> &str {
        "Code, commit, and fix knowledge keyed by files and functions"
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
        self.entries.categories(Some("language")).await
    }

    async fn count(&self) -> HubResult<usize> {
        self.entries.count().await
    }
}
