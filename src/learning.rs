//! Feedback and learning engine.
//!
//! Owns every write to [`SourceEffectiveness`]. Feedback updates the running
//! success rate of the source behind the rated item; resolved sessions fold
//! their duration into each accessed source's running average. Updates to
//! one source type are serialized by a per-source lock so concurrent
//! feedback cannot lose an increment.
//!
//! Insights are derived on demand from the stored sessions, interactions,
//! and effectiveness records; computing them never writes anything.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LearningConfig;
use crate::error::{HubError, HubResult};
use crate::fusion::{normalize_query, EffectivenessReader};
use crate::models::{
    DiagnosticSession, FeedbackKind, FeedbackRecord, FeedbackRequest, ItemType, KnowledgeGap,
    LearningInsights, SearchInteraction, SearchPattern, SessionState, SourceEffectiveness,
    SourceType, TrendingIssue,
};
use crate::store::{self, get_record, list_records, put_record, Store};

pub struct LearningEngine {
    store: Arc<dyn Store>,
    config: LearningConfig,
    source_locks: DashMap<SourceType, Arc<Mutex<()>>>,
}

impl LearningEngine {
    pub fn new(store: Arc<dyn Store>, config: LearningConfig) -> Self {
        Self {
            store,
            config,
            source_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, source_type: SourceType) -> Arc<Mutex<()>> {
        self.source_locks
            .entry(source_type)
            .or_default()
            .value()
            .clone()
    }

    /// Turn a raw request into a record, rejecting unknown kinds and bad ratings.
    pub fn validate_feedback(request: &FeedbackRequest) -> HubResult<FeedbackRecord> {
        if request.session_id.trim().is_empty() {
            return Err(HubError::validation("session_id must not be empty"));
        }
        if request.item_id.trim().is_empty() {
            return Err(HubError::validation("item_id must not be empty"));
        }
        let item_type: ItemType = request.item_type.parse()?;
        let feedback_type: FeedbackKind = request.feedback_type.parse()?;
        if let Some(r) = request.rating {
            if !(1..=5).contains(&r) {
                return Err(HubError::validation(format!(
                    "rating must be between 1 and 5, got {}",
                    r
                )));
            }
        }

        Ok(FeedbackRecord {
            id: Uuid::new_v4().to_string(),
            session_id: request.session_id.clone(),
            item_id: request.item_id.clone(),
            item_type,
            feedback_type,
            rating: request.rating,
            comments: request.comments.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Append a feedback record and apply it to its source's success rate.
    ///
    /// Returns the updated effectiveness when the record moved one.
    pub async fn record_feedback(
        &self,
        record: &FeedbackRecord,
    ) -> HubResult<Option<SourceEffectiveness>> {
        put_record(self.store.as_ref(), store::FEEDBACK, &record.id, record).await?;

        let (source_type, contribution) =
            match (record.item_type.source_type(), record.feedback_type.contribution()) {
                (Some(st), Some(c)) => (st, c),
                _ => {
                    debug!(
                        item_type = ?record.item_type,
                        feedback = ?record.feedback_type,
                        "feedback recorded without effectiveness change"
                    );
                    return Ok(None);
                }
            };

        let lock = self.lock_for(source_type);
        let _guard = lock.lock().await;

        let mut eff = self.effectiveness_of(source_type).await?;
        eff.sample_count += 1;
        eff.success_rate += (contribution - eff.success_rate) / eff.sample_count as f64;
        eff.success_rate = eff.success_rate.clamp(0.0, 1.0);
        eff.last_updated = Utc::now();
        put_record(
            self.store.as_ref(),
            store::EFFECTIVENESS,
            source_type.as_str(),
            &eff,
        )
        .await?;

        info!(
            source = %source_type,
            success_rate = eff.success_rate,
            samples = eff.sample_count,
            "effectiveness updated"
        );
        Ok(Some(eff))
    }

    /// Fold a resolved session's duration into each accessed source.
    ///
    /// Sessions in any other state are ignored.
    pub async fn record_session_outcome(&self, session: &DiagnosticSession) -> HubResult<()> {
        let minutes = match (session.state, session.time_to_resolve) {
            (SessionState::Resolved, Some(m)) => m,
            _ => return Ok(()),
        };
        if minutes < 0.0 {
            return Err(HubError::InvariantViolation(format!(
                "session {} has negative time_to_resolve {}",
                session.id, minutes
            )));
        }

        for &source_type in &session.knowledge_sources_accessed {
            let lock = self.lock_for(source_type);
            let _guard = lock.lock().await;

            let mut eff = self.effectiveness_of(source_type).await?;
            eff.resolution_samples += 1;
            eff.average_resolution_minutes +=
                (minutes - eff.average_resolution_minutes) / eff.resolution_samples as f64;
            eff.last_updated = Utc::now();
            put_record(
                self.store.as_ref(),
                store::EFFECTIVENESS,
                source_type.as_str(),
                &eff,
            )
            .await?;
        }
        debug!(session_id = %session.id, minutes, "session outcome folded");
        Ok(())
    }

    async fn effectiveness_of(&self, source_type: SourceType) -> HubResult<SourceEffectiveness> {
        Ok(
            get_record(self.store.as_ref(), store::EFFECTIVENESS, source_type.as_str())
                .await?
                .unwrap_or_else(|| SourceEffectiveness::empty(source_type)),
        )
    }

    /// Current effectiveness of every source type.
    pub async fn snapshot(&self) -> HubResult<Vec<SourceEffectiveness>> {
        let mut out = Vec::with_capacity(SourceType::ALL.len());
        for st in SourceType::ALL {
            out.push(self.effectiveness_of(st).await?);
        }
        Ok(out)
    }

    pub async fn feedback(&self) -> HubResult<Vec<FeedbackRecord>> {
        let mut records: Vec<FeedbackRecord> =
            list_records(self.store.as_ref(), store::FEEDBACK, None).await?;
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub async fn compute_insights(&self) -> HubResult<LearningInsights> {
        self.compute_insights_at(Utc::now()).await
    }

    /// Insights as of `now`, which anchors the trending windows.
    pub async fn compute_insights_at(&self, now: DateTime<Utc>) -> HubResult<LearningInsights> {
        let sessions: Vec<DiagnosticSession> =
            list_records(self.store.as_ref(), store::SESSIONS, None).await?;
        let interactions: Vec<SearchInteraction> =
            list_records(self.store.as_ref(), store::INTERACTIONS, None).await?;
        let effectiveness = self.snapshot().await?;

        Ok(LearningInsights {
            most_effective_sources: self.most_effective(&effectiveness),
            common_search_patterns: self.common_patterns(&interactions),
            average_resolution_time: average_resolution_time(&sessions),
            success_rate_by_source: effectiveness
                .iter()
                .filter(|e| e.sample_count > 0)
                .map(|e| (e.source_type, e.success_rate))
                .collect(),
            knowledge_gaps: self.knowledge_gaps(&sessions, &interactions),
            trending_issues: self.trending(&interactions, now),
        })
    }

    fn most_effective(&self, effectiveness: &[SourceEffectiveness]) -> Vec<SourceEffectiveness> {
        let mut ranked: Vec<SourceEffectiveness> = effectiveness
            .iter()
            .filter(|e| e.sample_count >= self.config.min_samples)
            .cloned()
            .collect();
        ranked.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.sample_count.cmp(&a.sample_count))
                .then(a.source_type.cmp(&b.source_type))
        });
        ranked.truncate(self.config.top_k);
        ranked
    }

    fn common_patterns(&self, interactions: &[SearchInteraction]) -> Vec<SearchPattern> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for i in interactions {
            let q = normalize_query(&i.query);
            if !q.is_empty() {
                *counts.entry(q).or_default() += 1;
            }
        }
        let mut patterns: Vec<SearchPattern> = counts
            .into_iter()
            .map(|(query, count)| SearchPattern { query, count })
            .collect();
        patterns.sort_by(|a, b| b.count.cmp(&a.count).then(a.query.cmp(&b.query)));
        patterns.truncate(self.config.top_k);
        patterns
    }

    fn knowledge_gaps(
        &self,
        sessions: &[DiagnosticSession],
        interactions: &[SearchInteraction],
    ) -> Vec<KnowledgeGap> {
        let resolved_sessions: BTreeSet<&str> = sessions
            .iter()
            .filter(|s| s.state == SessionState::Resolved)
            .map(|s| s.id.as_str())
            .collect();

        // query -> (occurrences, best score, ever resolved)
        let mut stats: BTreeMap<String, (usize, f64, bool)> = BTreeMap::new();
        for i in interactions {
            let q = normalize_query(&i.query);
            if q.is_empty() {
                continue;
            }
            let entry = stats.entry(q).or_insert((0, 0.0, false));
            entry.0 += 1;
            entry.1 = entry.1.max(i.top_score);
            entry.2 |= resolved_sessions.contains(i.session_id.as_str());
        }

        let mut gaps: Vec<KnowledgeGap> = stats
            .into_iter()
            .filter(|(_, (_, best, resolved))| {
                *best < self.config.knowledge_gap_threshold && !resolved
            })
            .map(|(query, (occurrences, best_score, _))| KnowledgeGap {
                query,
                occurrences,
                best_score,
            })
            .collect();
        gaps.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then(
                    a.best_score
                        .partial_cmp(&b.best_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.query.cmp(&b.query))
        });
        gaps
    }

    fn trending(&self, interactions: &[SearchInteraction], now: DateTime<Utc>) -> Vec<TrendingIssue> {
        let window = Duration::hours(self.config.trending_window_hours);
        let recent_start = now - window;
        let prior_start = recent_start - window;

        // query -> (recent, prior)
        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for i in interactions {
            let q = normalize_query(&i.query);
            if q.is_empty() || i.timestamp > now || i.timestamp <= prior_start {
                continue;
            }
            let entry = counts.entry(q).or_default();
            if i.timestamp > recent_start {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }

        let mut trending: Vec<TrendingIssue> = counts
            .into_iter()
            .filter(|(_, (recent, prior))| {
                *recent >= self.config.trending_min_count
                    && *recent as f64 > *prior as f64 * self.config.trending_ratio
            })
            .map(|(query, (recent_count, prior_count))| TrendingIssue {
                query,
                recent_count,
                prior_count,
            })
            .collect();
        trending.sort_by(|a, b| {
            b.recent_count
                .cmp(&a.recent_count)
                .then(a.query.cmp(&b.query))
        });
        trending
    }
}

fn average_resolution_time(sessions: &[DiagnosticSession]) -> f64 {
    let durations: Vec<f64> = sessions
        .iter()
        .filter(|s| s.state == SessionState::Resolved)
        .filter_map(|s| s.time_to_resolve)
        .collect();
    if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    }
}

#[async_trait]
impl EffectivenessReader for LearningEngine {
    async fn effectiveness(&self, source_type: SourceType) -> HubResult<SourceEffectiveness> {
        self.effectiveness_of(source_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn engine() -> (LearningEngine, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        (
            LearningEngine::new(store.clone(), LearningConfig::default()),
            store,
        )
    }

    fn request(item_type: &str, feedback_type: &str) -> FeedbackRequest {
        FeedbackRequest {
            session_id: "s1".into(),
            item_id: "item-1".into(),
            item_type: item_type.into(),
            feedback_type: feedback_type.into(),
            rating: None,
            comments: None,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap()
    }

    fn interaction(
        session_id: &str,
        seq: u32,
        query: &str,
        top_score: f64,
        ts: DateTime<Utc>,
    ) -> SearchInteraction {
        SearchInteraction {
            id: format!("{}-{}", session_id, seq),
            session_id: session_id.into(),
            sequence: seq,
            query: query.into(),
            result_count: 1,
            top_score,
            clicked_results: Default::default(),
            effectiveness_rating: None,
            timestamp: ts,
        }
    }

    fn session(id: &str, state: SessionState, minutes: Option<f64>) -> DiagnosticSession {
        DiagnosticSession {
            id: id.into(),
            initial_query: "q".into(),
            state,
            interaction_count: 0,
            knowledge_sources_accessed: [SourceType::SalesforceCase].into_iter().collect(),
            cases_viewed: Default::default(),
            created_date: at(0),
            updated_date: at(0),
            completed_date: None,
            time_to_resolve: minutes,
            resolution_successful: None,
            user_feedback: None,
        }
    }

    async fn put_interaction(store: &Arc<dyn Store>, i: &SearchInteraction) {
        put_record(
            store.as_ref(),
            store::INTERACTIONS,
            &format!("{}/{:08}", i.session_id, i.sequence),
            i,
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_validate_feedback_rejects_bad_input() {
        assert!(LearningEngine::validate_feedback(&request("case", "helpful")).is_ok());
        assert!(LearningEngine::validate_feedback(&request("ticket", "helpful")).is_err());
        assert!(LearningEngine::validate_feedback(&request("case", "great")).is_err());
        let mut bad_rating = request("case", "helpful");
        bad_rating.rating = Some(0);
        assert!(matches!(
            LearningEngine::validate_feedback(&bad_rating).unwrap_err(),
            HubError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_helpful_feedback_from_zero_samples() {
        let (engine, _) = engine();
        let before = engine.effectiveness(SourceType::SalesforceCase).await.unwrap();
        assert_eq!(before.sample_count, 0);

        let record = LearningEngine::validate_feedback(&request("case", "helpful")).unwrap();
        let after = engine.record_feedback(&record).await.unwrap().unwrap();
        assert_eq!(after.success_rate, 1.0);
        assert!(after.success_rate > before.success_rate);
        assert_eq!(after.sample_count, 1);
    }

    #[tokio::test]
    async fn test_running_mean_ignores_neutral_feedback() {
        let (engine, _) = engine();
        for kind in ["helpful", "incorrect", "not_helpful", "needs_update", "helpful"] {
            let record = LearningEngine::validate_feedback(&request("doc", kind)).unwrap();
            engine.record_feedback(&record).await.unwrap();
        }
        let eff = engine.effectiveness(SourceType::Documentation).await.unwrap();
        assert_eq!(eff.sample_count, 3);
        assert!((eff.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(engine.feedback().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_suggestion_feedback_moves_no_source() {
        let (engine, _) = engine();
        let record = LearningEngine::validate_feedback(&request("suggestion", "helpful")).unwrap();
        assert!(engine.record_feedback(&record).await.unwrap().is_none());
        for eff in engine.snapshot().await.unwrap() {
            assert_eq!(eff.sample_count, 0);
        }
    }

    #[tokio::test]
    async fn test_history_feedback_moves_history_weight() {
        let (engine, _) = engine();
        let record = LearningEngine::validate_feedback(&request("history", "incorrect")).unwrap();
        let eff = engine.record_feedback(&record).await.unwrap().unwrap();
        assert_eq!(eff.source_type, SourceType::HistoricalSearch);
        assert_eq!(eff.weight(), 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_feedback_keeps_every_sample() {
        let (engine, _) = engine();
        let engine = Arc::new(engine);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let record =
                    LearningEngine::validate_feedback(&request("code", "helpful")).unwrap();
                engine.record_feedback(&record).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let eff = engine.effectiveness(SourceType::CodeKnowledge).await.unwrap();
        assert_eq!(eff.sample_count, 20);
        assert_eq!(eff.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_session_outcome_running_average() {
        let (engine, _) = engine();
        for minutes in [10.0, 30.0] {
            engine
                .record_session_outcome(&session("s", SessionState::Resolved, Some(minutes)))
                .await
                .unwrap();
        }
        engine
            .record_session_outcome(&session("s", SessionState::Abandoned, None))
            .await
            .unwrap();
        let eff = engine.effectiveness(SourceType::SalesforceCase).await.unwrap();
        assert_eq!(eff.resolution_samples, 2);
        assert_eq!(eff.average_resolution_minutes, 20.0);
        // resolution outcomes do not move the feedback success rate
        assert_eq!(eff.sample_count, 0);
    }

    #[tokio::test]
    async fn test_average_resolution_time() {
        let (engine, store) = engine();
        for (id, minutes) in [("a", 10.0), ("b", 20.0), ("c", 30.0)] {
            let s = session(id, SessionState::Resolved, Some(minutes));
            put_record(store.as_ref(), store::SESSIONS, id, &s).await.unwrap();
        }
        let open = session("d", SessionState::Open, None);
        put_record(store.as_ref(), store::SESSIONS, "d", &open)
            .await
            .unwrap();

        let insights = engine.compute_insights_at(at(12)).await.unwrap();
        assert_eq!(insights.average_resolution_time, 20.0);
    }

    #[tokio::test]
    async fn test_most_effective_requires_min_samples() {
        let (engine, _) = engine();
        for _ in 0..3 {
            let r = LearningEngine::validate_feedback(&request("doc", "helpful")).unwrap();
            engine.record_feedback(&r).await.unwrap();
        }
        for kind in ["helpful", "incorrect", "incorrect"] {
            let r = LearningEngine::validate_feedback(&request("case", kind)).unwrap();
            engine.record_feedback(&r).await.unwrap();
        }
        // one sample only: below min_samples
        let r = LearningEngine::validate_feedback(&request("code", "helpful")).unwrap();
        engine.record_feedback(&r).await.unwrap();

        let insights = engine.compute_insights().await.unwrap();
        let order: Vec<SourceType> = insights
            .most_effective_sources
            .iter()
            .map(|e| e.source_type)
            .collect();
        assert_eq!(
            order,
            vec![SourceType::Documentation, SourceType::SalesforceCase]
        );
        assert_eq!(insights.success_rate_by_source.len(), 3);
        assert_eq!(
            insights.success_rate_by_source[&SourceType::CodeKnowledge],
            1.0
        );
    }

    #[tokio::test]
    async fn test_patterns_gaps_and_trending() {
        let (engine, store) = engine();
        let resolved = session("r", SessionState::Resolved, Some(5.0));
        put_record(store.as_ref(), store::SESSIONS, "r", &resolved)
            .await
            .unwrap();
        let open = session("o", SessionState::Open, None);
        put_record(store.as_ref(), store::SESSIONS, "o", &open)
            .await
            .unwrap();

        let now = at(23);
        let day_before = now - Duration::hours(30);
        let rows = vec![
            // low scores, never resolved: a gap, and trending (3 recent vs 1 prior)
            interaction("o", 0, "Kafka lag", 0.1, now - Duration::hours(1)),
            interaction("o", 1, "kafka  lag", 0.2, now - Duration::hours(2)),
            interaction("o", 2, "kafka lag", 0.1, now - Duration::hours(3)),
            interaction("o", 3, "kafka lag", 0.1, day_before),
            // low score but resolved: not a gap
            interaction("r", 0, "dns flap", 0.1, now - Duration::hours(1)),
            // high score: not a gap, not trending (1 recent)
            interaction("o", 4, "redis eviction", 0.9, now - Duration::hours(1)),
        ];
        for i in &rows {
            put_interaction(&store, i).await;
        }

        let insights = engine.compute_insights_at(now).await.unwrap();

        assert_eq!(insights.common_search_patterns[0].query, "kafka lag");
        assert_eq!(insights.common_search_patterns[0].count, 4);

        assert_eq!(insights.knowledge_gaps.len(), 1);
        assert_eq!(insights.knowledge_gaps[0].query, "kafka lag");
        assert_eq!(insights.knowledge_gaps[0].best_score, 0.2);

        assert_eq!(insights.trending_issues.len(), 1);
        assert_eq!(insights.trending_issues[0].query, "kafka lag");
        assert_eq!(insights.trending_issues[0].recent_count, 3);
        assert_eq!(insights.trending_issues[0].prior_count, 1);
    }

    #[tokio::test]
    async fn test_empty_insights() {
        let (engine, _) = engine();
        let insights = engine.compute_insights().await.unwrap();
        assert!(insights.most_effective_sources.is_empty());
        assert_eq!(insights.average_resolution_time, 0.0);
        assert!(insights.knowledge_gaps.is_empty());
        assert!(insights.trending_issues.is_empty());
    }
}
