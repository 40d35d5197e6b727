//! Source adapters: one uniform capability per knowledge store.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  AdapterRegistry                     │
//! │ ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐  │
//! │ │  Cases   │ │   Code   │ │   Docs   │ │ History  │  │
//! │ └──────────┘ └──────────┘ └──────────┘ └──────────┘  │
//! └──────────────────────────┬───────────────────────────┘
//!                            ▼
//!             FusionCoordinator::query() fan-out
//! ```
//!
//! Adapters share no mutable state with each other; each one owns the
//! `entries:<source_type>` collection of the injected store. Custom
//! adapters (remote case systems, code search services) implement
//! [`SourceAdapter`] and replace a built-in via [`AdapterRegistry::register`].

mod cases;
mod code;
pub mod collection;
mod docs;
mod history;
pub mod scoring;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{HubError, HubResult};
use crate::models::{KnowledgeEntry, NewKnowledgeEntry, SearchMode, SourceType};
use crate::store::Store;

pub use cases::CaseAdapter;
pub use code::CodeAdapter;
pub use docs::DocsAdapter;
pub use history::HistoryAdapter;
pub use scoring::{FieldWeights, KeywordScorer, RelevanceScorer};

/// Search filters: `service`, `tag`, `since` (`YYYY-MM-DD`) apply to every
/// adapter; the rest are adapter-specific and ignored where unknown.
pub type Filters = BTreeMap<String, String>;

/// One search hit with its source-local score.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterHit {
    pub entry: KnowledgeEntry,
    /// Not comparable across adapters.
    pub raw_score: f64,
}

/// A knowledge source the fusion coordinator can query.
///
/// `search` must not block indefinitely; the coordinator bounds every call
/// with the request deadline and cancels calls that overrun it.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    fn description(&self) -> &str;

    /// Name used in logs and status maps. Defaults to the source type.
    fn name(&self) -> &str {
        self.source_type().as_str()
    }

    /// Return up to `limit` hits ordered by descending `raw_score`.
    async fn search(&self, query: &str, filters: &Filters, limit: usize)
        -> HubResult<Vec<AdapterHit>>;

    async fn get(&self, id: &str) -> HubResult<KnowledgeEntry>;

    /// Store a new entry; assigns id and timestamps, defaults confidence.
    async fn add(&self, entry: NewKnowledgeEntry) -> HubResult<String>;

    /// Replace an entry's content and metadata, bumping `updated_date`.
    async fn update(&self, entry: KnowledgeEntry) -> HubResult<KnowledgeEntry>;

    /// Category and tag strings, for discovery.
    async fn list_categories(&self) -> HubResult<BTreeSet<String>>;

    async fn count(&self) -> HubResult<usize>;
}

// ═══════════════════════════════════════════════════════════════════════
// Shared search helpers
// ═══════════════════════════════════════════════════════════════════════

/// Apply the `service`, `tag`, and `since` filters.
pub fn matches_common_filters(entry: &KnowledgeEntry, filters: &Filters) -> HubResult<bool> {
    if let Some(service) = filters.get("service") {
        let wanted = service.to_lowercase();
        if !entry
            .affected_services
            .iter()
            .any(|s| s.to_lowercase() == wanted)
        {
            return Ok(false);
        }
    }

    if let Some(tag) = filters.get("tag") {
        if !entry.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            return Ok(false);
        }
    }

    if let Some(since_str) = filters.get("since") {
        let since_date = NaiveDate::parse_from_str(since_str, "%Y-%m-%d").map_err(|_| {
            HubError::validation(format!("since must be YYYY-MM-DD, got '{}'", since_str))
        })?;
        let since = since_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| HubError::validation("invalid since date"))?;
        if entry.updated_date < since {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Case-insensitive equality on each metadata key that appears in `filters`.
pub fn matches_metadata_filters(entry: &KnowledgeEntry, filters: &Filters, keys: &[&str]) -> bool {
    keys.iter().all(|key| match filters.get(*key) {
        Some(wanted) => entry
            .metadata_str(key)
            .map(|v| v.eq_ignore_ascii_case(wanted))
            .unwrap_or(false),
        None => true,
    })
}

/// Score, drop non-matches, and order: raw score desc, updated desc, id asc.
pub fn rank_entries(
    entries: Vec<KnowledgeEntry>,
    query: &str,
    scorer: &dyn RelevanceScorer,
    limit: usize,
) -> Vec<AdapterHit> {
    let mut hits: Vec<AdapterHit> = entries
        .into_iter()
        .filter_map(|entry| {
            let raw_score = scorer.score(query, &entry);
            (raw_score > 0.0).then_some(AdapterHit { entry, raw_score })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.entry.updated_date.cmp(&a.entry.updated_date))
            .then(a.entry.id.cmp(&b.entry.id))
    });
    hits.truncate(limit);
    hits
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Adapters keyed by source type; at most one per type.
pub struct AdapterRegistry {
    adapters: BTreeMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Registry with the four built-in store-backed adapters.
    pub fn with_builtins(store: Arc<dyn Store>, config: &Config) -> Self {
        let confidence = config.extraction.default_confidence;
        let mut registry = Self::new();
        registry.register(Arc::new(CaseAdapter::new(store.clone(), confidence)));
        registry.register(Arc::new(CodeAdapter::new(store.clone(), confidence)));
        registry.register(Arc::new(DocsAdapter::new(store.clone(), confidence)));
        registry.register(Arc::new(HistoryAdapter::new(store, confidence)));
        registry
    }

    /// Register an adapter, replacing any existing one for the same source type.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source_type(), adapter);
    }

    pub fn get(&self, source_type: SourceType) -> HubResult<Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&source_type)
            .cloned()
            .ok_or_else(|| HubError::not_found("source adapter", source_type.as_str()))
    }

    /// Registered adapters selected by `mode`, in source-type order.
    pub fn for_mode(&self, mode: SearchMode) -> Vec<Arc<dyn SourceAdapter>> {
        mode.source_types()
            .into_iter()
            .filter_map(|st| self.adapters.get(&st).cloned())
            .collect()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.values()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
