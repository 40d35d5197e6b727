//! Core data models shared by every component.
//!
//! Knowledge entries, diagnostic sessions, search interactions, feedback
//! records, and per-source effectiveness all flow through these types. All
//! of them serialize to JSON, which is how the [`Store`](crate::store::Store)
//! persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::HubError;

/// Free-form metadata attached to an entry.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// The kind of knowledge store an entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    SalesforceCase,
    CodeKnowledge,
    Documentation,
    HistoricalSearch,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::SalesforceCase,
        SourceType::CodeKnowledge,
        SourceType::Documentation,
        SourceType::HistoricalSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::SalesforceCase => "salesforce_case",
            SourceType::CodeKnowledge => "code_knowledge",
            SourceType::Documentation => "documentation",
            SourceType::HistoricalSearch => "historical_search",
        }
    }

    /// Store collection holding entries of this type.
    pub fn collection(&self) -> String {
        format!("entries:{}", self.as_str())
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "salesforce_case" | "case" | "cases" => Ok(SourceType::SalesforceCase),
            "code_knowledge" | "code" => Ok(SourceType::CodeKnowledge),
            "documentation" | "doc" | "docs" => Ok(SourceType::Documentation),
            "historical_search" | "history" => Ok(SourceType::HistoricalSearch),
            other => Err(HubError::validation(format!(
                "unknown source type: '{}'. Use salesforce_case, code_knowledge, documentation, or historical_search",
                other
            ))),
        }
    }
}

/// Which adapters a unified query fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    All,
    Cases,
    Code,
    Docs,
    History,
}

impl SearchMode {
    pub fn source_types(&self) -> Vec<SourceType> {
        match self {
            SearchMode::All => SourceType::ALL.to_vec(),
            SearchMode::Cases => vec![SourceType::SalesforceCase],
            SearchMode::Code => vec![SourceType::CodeKnowledge],
            SearchMode::Docs => vec![SourceType::Documentation],
            SearchMode::History => vec![SourceType::HistoricalSearch],
        }
    }
}

impl FromStr for SearchMode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SearchMode::All),
            "cases" => Ok(SearchMode::Cases),
            "code" => Ok(SearchMode::Code),
            "docs" => Ok(SearchMode::Docs),
            "history" => Ok(SearchMode::History),
            other => Err(HubError::validation(format!(
                "unknown search mode: '{}'. Use all, cases, code, docs, or history",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Knowledge entries
// ═══════════════════════════════════════════════════════════════════════

/// A stored unit of operational knowledge.
///
/// `id`, `created_date` and `updated_date` are assigned by the owning
/// source adapter. Only that adapter mutates content and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub affected_services: BTreeSet<String>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    /// Extraction/curation confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl KnowledgeEntry {
    /// Metadata value rendered as a plain string, if present.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// An entry submitted for creation; the adapter fills in server-assigned fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewKnowledgeEntry {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub affected_services: BTreeSet<String>,
    /// Left unset to take the configured default.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

// ═══════════════════════════════════════════════════════════════════════
// Sessions and interactions
// ═══════════════════════════════════════════════════════════════════════

/// Resolution state machine of a diagnostic session.
///
/// `Open → ResolutionAttempted → {Resolved | Abandoned}`; `Open` may also be
/// abandoned directly. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    ResolutionAttempted,
    Resolved,
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Resolved | SessionState::Abandoned)
    }
}

/// Structured feedback a user leaves when closing a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFeedback {
    pub rating: Option<u8>,
    pub comments: Option<String>,
}

/// The stateful record of one troubleshooting conversation.
///
/// Interactions are stored separately and listed through
/// [`SessionManager::interactions`](crate::session::SessionManager::interactions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSession {
    pub id: String,
    pub initial_query: String,
    pub state: SessionState,
    pub interaction_count: u32,
    #[serde(default)]
    pub knowledge_sources_accessed: BTreeSet<SourceType>,
    #[serde(default)]
    pub cases_viewed: BTreeSet<String>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    pub completed_date: Option<DateTime<Utc>>,
    /// Minutes from creation to resolution; set only in `Resolved`.
    pub time_to_resolve: Option<f64>,
    pub resolution_successful: Option<bool>,
    pub user_feedback: Option<SessionFeedback>,
}

/// One query issued inside a session. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchInteraction {
    pub id: String,
    pub session_id: String,
    /// Position within the session, starting at 0.
    pub sequence: u32,
    pub query: String,
    pub result_count: usize,
    /// Best fused score of the response (its diagnostic confidence).
    pub top_score: f64,
    #[serde(default)]
    pub clicked_results: BTreeSet<String>,
    pub effectiveness_rating: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
// Feedback and learning
// ═══════════════════════════════════════════════════════════════════════

/// What kind of item a feedback record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Case,
    Code,
    Doc,
    /// A past query listed under `historical_searches`.
    History,
    Suggestion,
}

impl ItemType {
    /// The source whose effectiveness this feedback moves, if any.
    pub fn source_type(&self) -> Option<SourceType> {
        match self {
            ItemType::Case => Some(SourceType::SalesforceCase),
            ItemType::Code => Some(SourceType::CodeKnowledge),
            ItemType::Doc => Some(SourceType::Documentation),
            ItemType::History => Some(SourceType::HistoricalSearch),
            ItemType::Suggestion => None,
        }
    }
}

impl FromStr for ItemType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "case" => Ok(ItemType::Case),
            "code" => Ok(ItemType::Code),
            "doc" => Ok(ItemType::Doc),
            "history" => Ok(ItemType::History),
            "suggestion" => Ok(ItemType::Suggestion),
            other => Err(HubError::validation(format!(
                "unknown item type: '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Helpful,
    NotHelpful,
    Incorrect,
    NeedsUpdate,
}

impl FeedbackKind {
    /// Contribution to the running success rate. `None` leaves the mean unchanged.
    pub fn contribution(&self) -> Option<f64> {
        match self {
            FeedbackKind::Helpful => Some(1.0),
            FeedbackKind::Incorrect => Some(0.0),
            FeedbackKind::NotHelpful | FeedbackKind::NeedsUpdate => None,
        }
    }
}

impl FromStr for FeedbackKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helpful" => Ok(FeedbackKind::Helpful),
            "not_helpful" => Ok(FeedbackKind::NotHelpful),
            "incorrect" => Ok(FeedbackKind::Incorrect),
            "needs_update" => Ok(FeedbackKind::NeedsUpdate),
            other => Err(HubError::validation(format!(
                "unknown feedback type: '{}'",
                other
            ))),
        }
    }
}

/// A validated, append-only feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub session_id: String,
    pub item_id: String,
    pub item_type: ItemType,
    pub feedback_type: FeedbackKind,
    pub rating: Option<u8>,
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate effectiveness of one source type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEffectiveness {
    pub source_type: SourceType,
    /// Feedback events that moved the success rate.
    pub sample_count: u64,
    /// Running mean of helpful (1) / incorrect (0) feedback, in `[0, 1]`.
    pub success_rate: f64,
    pub resolution_samples: u64,
    pub average_resolution_minutes: f64,
    pub last_updated: DateTime<Utc>,
}

impl SourceEffectiveness {
    pub fn empty(source_type: SourceType) -> Self {
        Self {
            source_type,
            sample_count: 0,
            success_rate: 0.0,
            resolution_samples: 0,
            average_resolution_minutes: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Ranking weight: the success rate, or 1.0 while no samples exist.
    pub fn weight(&self) -> f64 {
        if self.sample_count == 0 {
            1.0
        } else {
            self.success_rate
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPattern {
    pub query: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub query: String,
    pub occurrences: usize,
    pub best_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingIssue {
    pub query: String,
    pub recent_count: usize,
    pub prior_count: usize,
}

/// Aggregate view derived from sessions, interactions, and effectiveness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningInsights {
    pub most_effective_sources: Vec<SourceEffectiveness>,
    pub common_search_patterns: Vec<SearchPattern>,
    /// Mean minutes to resolve across resolved sessions (0.0 when none).
    pub average_resolution_time: f64,
    pub success_rate_by_source: BTreeMap<SourceType, f64>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
    pub trending_issues: Vec<TrendingIssue>,
}

// ═══════════════════════════════════════════════════════════════════════
// Extraction
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Case,
    Email,
    Log,
    Documentation,
}

impl FromStr for ContentType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "case" => Ok(ContentType::Case),
            "email" => Ok(ContentType::Email),
            "log" => Ok(ContentType::Log),
            "documentation" | "doc" | "docs" => Ok(ContentType::Documentation),
            other => Err(HubError::validation(format!(
                "unknown content type: '{}'. Use case, email, log, or documentation",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    #[default]
    Incident,
    FeatureRequest,
    Question,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Incident => "incident",
            CaseType::FeatureRequest => "feature_request",
            CaseType::Question => "question",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeExtractionRequest {
    pub raw_content: String,
    #[serde(default)]
    pub content_type: ContentType,
}

/// Structured candidate produced by the extractor. Not yet stored anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedKnowledge {
    pub title: Option<String>,
    pub description: Option<String>,
    pub affected_services: Vec<String>,
    pub symptoms: Vec<String>,
    pub error_messages: Vec<String>,
    pub severity: Option<Severity>,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub suggested_case_type: CaseType,
}

impl ExtractedKnowledge {
    /// Build an unsaved entry for committing through a source adapter.
    pub fn into_entry(self) -> NewKnowledgeEntry {
        let mut metadata = Metadata::new();
        metadata.insert(
            "case_type".to_string(),
            serde_json::Value::String(self.suggested_case_type.as_str().to_string()),
        );
        if let Some(sev) = self.severity {
            metadata.insert(
                "severity".to_string(),
                serde_json::Value::String(sev.as_str().to_string()),
            );
        }
        if !self.symptoms.is_empty() {
            metadata.insert("symptoms".to_string(), serde_json::json!(self.symptoms));
        }
        if !self.error_messages.is_empty() {
            metadata.insert(
                "error_messages".to_string(),
                serde_json::json!(self.error_messages),
            );
        }

        NewKnowledgeEntry {
            title: self.title.unwrap_or_else(|| "(untitled)".to_string()),
            content: self.description.unwrap_or_default(),
            tags: self.tags,
            affected_services: self.affected_services.into_iter().collect(),
            confidence: Some(self.confidence),
            metadata,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Unified search
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedSearchRequest {
    pub query: String,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Caps each category and the merged list. Defaults to `fusion.default_limit`.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Outcome of one adapter's participation in a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Timeout,
    Error,
}

/// An entry with its scoring breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub entry: KnowledgeEntry,
    /// Source-local score as returned by the adapter.
    pub raw_score: f64,
    /// Min-max normalized within the adapter's result set.
    pub normalized_score: f64,
    /// Effectiveness weight applied for the entry's source type.
    pub effectiveness: f64,
    /// `normalized_score × effectiveness`.
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSearchResponse {
    pub query: String,
    pub session_id: Option<String>,
    pub total_results: usize,
    pub case_results: Vec<RankedEntry>,
    pub code_results: Vec<RankedEntry>,
    pub doc_results: Vec<RankedEntry>,
    pub historical_searches: Vec<RankedEntry>,
    pub suggestions: Vec<String>,
    /// Highest fused score across returned entries, 0.0 when empty.
    pub diagnostic_confidence: f64,
    pub data_sources: BTreeMap<SourceType, SourceStatus>,
}

/// Raw feedback as it arrives from a caller; validated into a [`FeedbackRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub session_id: String,
    pub item_id: String,
    pub item_type: String,
    pub feedback_type: String,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_mode_selects_adapters() {
        assert_eq!(SearchMode::All.source_types().len(), 4);
        assert_eq!(
            SearchMode::Docs.source_types(),
            vec![SourceType::Documentation]
        );
        assert_eq!(
            SearchMode::History.source_types(),
            vec![SourceType::HistoricalSearch]
        );
    }

    #[test]
    fn test_source_type_parse_aliases() {
        assert_eq!(
            "case".parse::<SourceType>().unwrap(),
            SourceType::SalesforceCase
        );
        assert_eq!(
            "code_knowledge".parse::<SourceType>().unwrap(),
            SourceType::CodeKnowledge
        );
        assert!("wiki".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_feedback_contribution() {
        assert_eq!(FeedbackKind::Helpful.contribution(), Some(1.0));
        assert_eq!(FeedbackKind::Incorrect.contribution(), Some(0.0));
        assert_eq!(FeedbackKind::NotHelpful.contribution(), None);
        assert_eq!(FeedbackKind::NeedsUpdate.contribution(), None);
    }

    #[test]
    fn test_effectiveness_weight_defaults_to_one() {
        let eff = SourceEffectiveness::empty(SourceType::Documentation);
        assert_eq!(eff.weight(), 1.0);
    }

    #[test]
    fn test_source_status_map_serializes_with_string_keys() {
        let mut resp = UnifiedSearchResponse::default();
        resp.data_sources
            .insert(SourceType::SalesforceCase, SourceStatus::Timeout);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["data_sources"]["salesforce_case"], "timeout");
    }

    #[test]
    fn test_extracted_into_entry_keeps_confidence() {
        let extracted = ExtractedKnowledge {
            title: Some("Kafka lag".into()),
            description: Some("consumer lag grows".into()),
            affected_services: vec!["kafka".into()],
            symptoms: vec![],
            error_messages: vec![],
            severity: Some(Severity::High),
            tags: vec!["kafka".into(), "high".into()],
            confidence: 0.71,
            suggested_case_type: CaseType::Incident,
        };
        let entry = extracted.into_entry();
        assert_eq!(entry.title, "Kafka lag");
        assert_eq!(entry.confidence, Some(0.71));
        assert!(entry.affected_services.contains("kafka"));
        assert_eq!(entry.metadata["severity"], "high");
        assert_eq!(entry.metadata["case_type"], "incident");
    }
}
