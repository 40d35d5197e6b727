//! Search-history adapter (`historical_search`).
//!
//! Each entry is a past query: the query text is the title, and metadata
//! records how many results it produced and its best fused score. Matching
//! a new query against old ones surfaces what others tried before.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::collection::EntryCollection;
use super::scoring::{FieldWeights, KeywordScorer, RelevanceScorer};
use super::{matches_common_filters, rank_entries, AdapterHit, Filters, SourceAdapter};
use crate::error::HubResult;
use crate::models::{KnowledgeEntry, Metadata, NewKnowledgeEntry, SourceType};
use crate::store::Store;

pub struct HistoryAdapter {
    entries: EntryCollection,
    scorer: Arc<dyn RelevanceScorer>,
}

impl HistoryAdapter {
    pub fn new(store: Arc<dyn Store>, default_confidence: f64) -> Self {
        Self::with_scorer(
            store,
            default_confidence,
            Arc::new(KeywordScorer::new(FieldWeights {
                title: 3.0,
                tags: 1.0,
                services: 1.5,
                metadata: 0.5,
                content: 0.5,
            })),
        )
    }

    pub fn with_scorer(
        store: Arc<dyn Store>,
        default_confidence: f64,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Self {
        Self {
            entries: EntryCollection::new(store, SourceType::HistoricalSearch, default_confidence),
            scorer,
        }
    }

    /// Build the entry recorded for a completed query.
    ///
    /// Confidence is the query's diagnostic confidence, so well-answered
    /// past queries rank above poorly-answered ones.
    pub fn query_entry(
        query: &str,
        session_id: Option<&str>,
        result_count: usize,
        top_score: f64,
    ) -> NewKnowledgeEntry {
        let mut metadata = Metadata::new();
        metadata.insert("result_count".into(), serde_json::json!(result_count));
        metadata.insert("top_score".into(), serde_json::json!(top_score));
        if let Some(sid) = session_id {
            metadata.insert("session_id".into(), serde_json::json!(sid));
        }
        NewKnowledgeEntry {
            title: query.trim().to_string(),
            content: String::new(),
            tags: Vec::new(),
            affected_services: Default::default(),
            confidence: Some(top_score.clamp(0.0, 1.0)),
            metadata,
        }
    }
}

#[async_trait]
impl SourceAdapter for HistoryAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::HistoricalSearch
    }

    fn description(&self) -> &str {
        "Previously issued diagnostic queries"
    }

    async fn search(
        &self,
        query: &str,
        filters: &Filters,
        limit: usize,
    ) -> HubResult<Vec<AdapterHit>> {
        let mut candidates = Vec::new();
        for entry in self.entries.all().await? {
            if matches_common_filters(&entry, filters)? {
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
        self.entries.categories(None).await
    }

    async fn count(&self) -> HubResult<usize> {
        self.entries.count().await
    }
}
