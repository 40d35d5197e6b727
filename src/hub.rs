//! Unified query façade.
//!
//! [`KnowledgeHub`] wires the store, adapters, extractor, fusion coordinator,
//! session manager, and learning engine together and is the only type the
//! CLI talks to.
//!
//! ```text
//! query ──▶ SessionManager (open/load) ──▶ FusionCoordinator fan-out
//!                                             │
//!           response ◀── record interaction ◀─┘──▶ history entry
//! ```

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::{AdapterRegistry, HistoryAdapter};
use crate::config::Config;
use crate::error::{HubError, HubResult};
use crate::extract::KnowledgeExtractor;
use crate::fusion::FusionCoordinator;
use crate::learning::LearningEngine;
use crate::models::{
    DiagnosticSession, ExtractedKnowledge, FeedbackRecord, FeedbackRequest, KnowledgeEntry,
    KnowledgeExtractionRequest, LearningInsights, NewKnowledgeEntry, SearchInteraction,
    SessionFeedback, SourceType, UnifiedSearchRequest, UnifiedSearchResponse,
};
use crate::session::{NewInteraction, SessionManager};
use crate::sources::{self, SourceInfo};
use crate::store::{InMemoryStore, SqliteStore, Store};

pub struct KnowledgeHub {
    config: Config,
    store: Arc<dyn Store>,
    registry: Arc<AdapterRegistry>,
    extractor: KnowledgeExtractor,
    fusion: FusionCoordinator,
    sessions: SessionManager,
    learning: Arc<LearningEngine>,
}

impl KnowledgeHub {
    /// Build a hub on the store named by `[db] path`, or in memory without one.
    pub async fn from_config(config: &Config) -> HubResult<Self> {
        let store: Arc<dyn Store> = match &config.db.path {
            Some(path) => Arc::new(SqliteStore::open(path).await?),
            None => Arc::new(InMemoryStore::new()),
        };
        Self::with_store(store, config.clone())
    }

    /// Build a hub with the four built-in adapters on `store`.
    pub fn with_store(store: Arc<dyn Store>, config: Config) -> HubResult<Self> {
        let registry = AdapterRegistry::with_builtins(store.clone(), &config);
        Self::with_registry(store, registry, config)
    }

    /// Build a hub around a caller-assembled adapter registry.
    pub fn with_registry(
        store: Arc<dyn Store>,
        registry: AdapterRegistry,
        config: Config,
    ) -> HubResult<Self> {
        let registry = Arc::new(registry);
        let learning = Arc::new(LearningEngine::new(store.clone(), config.learning.clone()));
        let fusion = FusionCoordinator::new(
            registry.clone(),
            learning.clone(),
            config.fusion.clone(),
        );
        Ok(Self {
            extractor: KnowledgeExtractor::new(&config.extraction)?,
            sessions: SessionManager::new(store.clone()),
            store,
            registry,
            fusion,
            learning,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn learning(&self) -> &LearningEngine {
        &self.learning
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    // ── Query ─────────────────────────────────────────────────────────

    /// Answer a diagnostic query within its session.
    ///
    /// Without a `session_id` a new session is opened. Each query appends a
    /// [`SearchInteraction`] and, when `fusion.record_history` is set, is
    /// stored as a `historical_search` entry after the response is built.
    pub async fn query(&self, request: UnifiedSearchRequest) -> HubResult<UnifiedSearchResponse> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(HubError::validation("query must not be empty"));
        }

        let existing = match &request.session_id {
            Some(id) => {
                let session = self.sessions.get(id).await?;
                if session.state.is_terminal() {
                    return Err(HubError::validation(format!(
                        "session {} is closed ({:?})",
                        id, session.state
                    )));
                }
                Some(session)
            }
            None => None,
        };

        let mut response = self.fusion.query(&request).await?;
        let session = match existing {
            Some(session) => session,
            None => self.sessions.open(&query).await?,
        };
        response.session_id = Some(session.id.clone());

        let sources = response
            .case_results
            .iter()
            .chain(&response.code_results)
            .chain(&response.doc_results)
            .chain(&response.historical_searches)
            .map(|r| r.entry.source_type)
            .collect();
        self.sessions
            .record_interaction(
                &session.id,
                NewInteraction {
                    query: query.clone(),
                    result_count: response.total_results,
                    top_score: response.diagnostic_confidence,
                    sources,
                    ..Default::default()
                },
            )
            .await?;

        if self.config.fusion.record_history {
            self.record_history(&query, &session.id, &response).await;
        }
        Ok(response)
    }

    async fn record_history(&self, query: &str, session_id: &str, response: &UnifiedSearchResponse) {
        let adapter = match self.registry.get(SourceType::HistoricalSearch) {
            Ok(adapter) => adapter,
            Err(_) => return,
        };
        let entry = HistoryAdapter::query_entry(
            query,
            Some(session_id),
            response.total_results,
            response.diagnostic_confidence,
        );
        if let Err(e) = adapter.add(entry).await {
            warn!(session_id, error = %e, "failed to record query history");
        }
    }

    // ── Knowledge entries ─────────────────────────────────────────────

    pub fn extract(&self, request: &KnowledgeExtractionRequest) -> HubResult<ExtractedKnowledge> {
        if request.raw_content.trim().is_empty() {
            return Err(HubError::validation("raw_content must not be empty"));
        }
        Ok(self
            .extractor
            .extract(&request.raw_content, request.content_type))
    }

    /// Store an extraction result through the adapter for `source_type`.
    pub async fn commit_extracted(
        &self,
        source_type: SourceType,
        extracted: ExtractedKnowledge,
    ) -> HubResult<String> {
        self.add_entry(source_type, extracted.into_entry()).await
    }

    pub async fn add_entry(
        &self,
        source_type: SourceType,
        entry: NewKnowledgeEntry,
    ) -> HubResult<String> {
        let id = self.registry.get(source_type)?.add(entry).await?;
        info!(source = %source_type, id = %id, "entry added");
        Ok(id)
    }

    pub async fn get_entry(&self, source_type: SourceType, id: &str) -> HubResult<KnowledgeEntry> {
        self.registry.get(source_type)?.get(id).await
    }

    pub async fn update_entry(&self, entry: KnowledgeEntry) -> HubResult<KnowledgeEntry> {
        self.registry.get(entry.source_type)?.update(entry).await
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub async fn get_session(&self, session_id: &str) -> HubResult<DiagnosticSession> {
        self.sessions.get(session_id).await
    }

    pub async fn list_sessions(&self) -> HubResult<Vec<DiagnosticSession>> {
        self.sessions.list().await
    }

    pub async fn interactions(&self, session_id: &str) -> HubResult<Vec<SearchInteraction>> {
        self.sessions.get(session_id).await?;
        self.sessions.interactions(session_id).await
    }

    pub async fn record_view(
        &self,
        session_id: &str,
        item_id: &str,
        source_type: SourceType,
    ) -> HubResult<DiagnosticSession> {
        self.sessions
            .record_view(session_id, item_id, source_type)
            .await
    }

    /// Rate the session's latest query, 1 to 5.
    pub async fn rate_interaction(
        &self,
        session_id: &str,
        rating: u8,
    ) -> HubResult<SearchInteraction> {
        self.sessions.rate_interaction(session_id, rating).await
    }

    pub async fn mark_resolution_attempted(
        &self,
        session_id: &str,
    ) -> HubResult<DiagnosticSession> {
        self.sessions.mark_resolution_attempted(session_id).await
    }

    /// Record a resolution outcome and, once resolved, fold it into learning.
    ///
    /// A learning failure is logged; the session transition still stands.
    pub async fn resolve_session(
        &self,
        session_id: &str,
        successful: bool,
        feedback: Option<SessionFeedback>,
    ) -> HubResult<DiagnosticSession> {
        let session = self
            .sessions
            .resolve(session_id, successful, feedback)
            .await?;
        if let Err(e) = self.learning.record_session_outcome(&session).await {
            warn!(session_id, error = %e, "failed to fold session outcome into learning");
        }
        Ok(session)
    }

    pub async fn abandon_session(
        &self,
        session_id: &str,
        feedback: Option<SessionFeedback>,
    ) -> HubResult<DiagnosticSession> {
        self.sessions.abandon(session_id, feedback).await
    }

    pub async fn delete_session(&self, session_id: &str, force: bool) -> HubResult<()> {
        self.sessions.delete(session_id, force).await
    }

    // ── Feedback and learning ─────────────────────────────────────────

    /// Validate and apply feedback. The session must exist.
    pub async fn submit_feedback(&self, request: &FeedbackRequest) -> HubResult<FeedbackRecord> {
        let record = LearningEngine::validate_feedback(request)?;
        self.sessions.get(&record.session_id).await?;
        self.learning.record_feedback(&record).await?;
        Ok(record)
    }

    pub async fn insights(&self) -> HubResult<LearningInsights> {
        self.learning.compute_insights().await
    }

    /// Registered adapters with entry counts and categories.
    pub async fn sources(&self) -> HubResult<Vec<SourceInfo>> {
        sources::collect_sources(&self.registry).await
    }
}
