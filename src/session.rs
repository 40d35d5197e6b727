//! Diagnostic session lifecycle.
//!
//! ```text
//!  open ──▶ Open ──mark_resolution_attempted──▶ ResolutionAttempted
//!            │                                     │        │
//!            │ resolve(true)                resolve(true)  abandon
//!            │ abandon                             ▼        ▼
//!            └───────────────────────────────▶ Resolved  Abandoned
//! ```
//!
//! Queries append [`SearchInteraction`]s without changing state. Writes to
//! one session are serialized through a per-session async lock held in a
//! `DashMap`; different sessions proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{HubError, HubResult};
use crate::models::{
    DiagnosticSession, SearchInteraction, SessionFeedback, SessionState, SourceType,
};
use crate::store::{self, get_record, list_records, put_record, Store};

/// A query outcome to append to a session.
#[derive(Debug, Clone, Default)]
pub struct NewInteraction {
    pub query: String,
    pub result_count: usize,
    pub top_score: f64,
    /// Sources that contributed results.
    pub sources: BTreeSet<SourceType>,
    pub clicked_results: BTreeSet<String>,
    pub effectiveness_rating: Option<u8>,
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

fn validate_rating(rating: Option<u8>) -> HubResult<()> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => Err(HubError::validation(format!(
            "rating must be between 1 and 5, got {}",
            r
        ))),
        _ => Ok(()),
    }
}

fn interaction_key(session_id: &str, sequence: u32) -> String {
    format!("{}/{:08}", session_id, sequence)
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop a terminal session's lock entry. Later callers get a fresh lock
    /// and re-read the session, which rejects further state changes.
    fn release_lock(&self, session_id: &str, guard: MutexGuard<'_, ()>) {
        drop(guard);
        self.locks.remove(session_id);
    }

    /// Read a session under its lock; an unknown id leaves no lock behind.
    async fn load(&self, session_id: &str) -> HubResult<DiagnosticSession> {
        let found = self.get(session_id).await;
        if let Err(HubError::NotFound { .. }) = &found {
            self.locks.remove(session_id);
        }
        found
    }

    /// Error for a write to a terminal session, releasing its lock entry.
    fn closed(&self, session_id: &str, state: SessionState) -> HubError {
        self.locks.remove(session_id);
        HubError::validation(format!("session {} is closed ({:?})", session_id, state))
    }

    async fn save(&self, session: &DiagnosticSession) -> HubResult<()> {
        put_record(self.store.as_ref(), store::SESSIONS, &session.id, session).await
    }

    /// Start a session for the first query of a conversation.
    pub async fn open(&self, initial_query: &str) -> HubResult<DiagnosticSession> {
        let initial_query = initial_query.trim();
        if initial_query.is_empty() {
            return Err(HubError::validation("initial query must not be empty"));
        }
        let now = Utc::now();
        let session = DiagnosticSession {
            id: Uuid::new_v4().to_string(),
            initial_query: initial_query.to_string(),
            state: SessionState::Open,
            interaction_count: 0,
            knowledge_sources_accessed: BTreeSet::new(),
            cases_viewed: BTreeSet::new(),
            created_date: now,
            updated_date: now,
            completed_date: None,
            time_to_resolve: None,
            resolution_successful: None,
            user_feedback: None,
        };
        self.save(&session).await?;
        info!(session_id = %session.id, "session opened");
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> HubResult<DiagnosticSession> {
        get_record(self.store.as_ref(), store::SESSIONS, session_id)
            .await?
            .ok_or_else(|| HubError::not_found("session", session_id))
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> HubResult<Vec<DiagnosticSession>> {
        let mut sessions: Vec<DiagnosticSession> =
            list_records(self.store.as_ref(), store::SESSIONS, None).await?;
        sessions.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then(a.id.cmp(&b.id))
        });
        Ok(sessions)
    }

    /// The session's interactions in sequence order.
    pub async fn interactions(&self, session_id: &str) -> HubResult<Vec<SearchInteraction>> {
        let prefix = format!("{}/", session_id);
        list_records(self.store.as_ref(), store::INTERACTIONS, Some(&prefix)).await
    }

    /// Append an interaction. Rejected for unknown or closed sessions.
    pub async fn record_interaction(
        &self,
        session_id: &str,
        new: NewInteraction,
    ) -> HubResult<SearchInteraction> {
        validate_rating(new.effectiveness_rating)?;
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        if session.state.is_terminal() {
            return Err(self.closed(session_id, session.state));
        }

        let now = Utc::now();
        let interaction = SearchInteraction {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            sequence: session.interaction_count,
            query: new.query,
            result_count: new.result_count,
            top_score: new.top_score,
            clicked_results: new.clicked_results,
            effectiveness_rating: new.effectiveness_rating,
            timestamp: now,
        };
        self.save_interaction(&interaction).await?;

        session.interaction_count += 1;
        session.knowledge_sources_accessed.extend(new.sources);
        session.updated_date = now;
        self.save(&session).await?;

        debug!(
            session_id = %session.id,
            sequence = interaction.sequence,
            "interaction recorded"
        );
        Ok(interaction)
    }

    /// Note that the user opened a result.
    ///
    /// The item is also added to `clicked_results` of the session's latest
    /// interaction.
    pub async fn record_view(
        &self,
        session_id: &str,
        item_id: &str,
        source_type: SourceType,
    ) -> HubResult<DiagnosticSession> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        if session.state.is_terminal() {
            return Err(self.closed(session_id, session.state));
        }
        if let Some(mut latest) = self.latest_interaction(&session).await? {
            latest.clicked_results.insert(item_id.to_string());
            self.save_interaction(&latest).await?;
        }
        session.knowledge_sources_accessed.insert(source_type);
        if source_type == SourceType::SalesforceCase {
            session.cases_viewed.insert(item_id.to_string());
        }
        session.updated_date = Utc::now();
        self.save(&session).await?;
        Ok(session)
    }

    /// Rate how useful the session's latest query was, 1 to 5.
    ///
    /// Allowed in any state, so a query can still be rated after resolution.
    pub async fn rate_interaction(
        &self,
        session_id: &str,
        rating: u8,
    ) -> HubResult<SearchInteraction> {
        validate_rating(Some(rating))?;
        let lock = self.lock_for(session_id);
        let guard = lock.lock().await;

        let session = self.load(session_id).await?;
        let rated = self.rate_latest(&session, rating).await;
        if session.state.is_terminal() {
            self.release_lock(session_id, guard);
        }
        rated
    }

    async fn rate_latest(
        &self,
        session: &DiagnosticSession,
        rating: u8,
    ) -> HubResult<SearchInteraction> {
        let mut latest = self.latest_interaction(session).await?.ok_or_else(|| {
            HubError::validation(format!("session {} has no queries to rate", session.id))
        })?;
        latest.effectiveness_rating = Some(rating);
        self.save_interaction(&latest).await?;
        debug!(
            session_id = %session.id,
            sequence = latest.sequence,
            rating,
            "interaction rated"
        );
        Ok(latest)
    }

    async fn latest_interaction(
        &self,
        session: &DiagnosticSession,
    ) -> HubResult<Option<SearchInteraction>> {
        match session.interaction_count.checked_sub(1) {
            Some(last) => {
                get_record(
                    self.store.as_ref(),
                    store::INTERACTIONS,
                    &interaction_key(&session.id, last),
                )
                .await
            }
            None => Ok(None),
        }
    }

    async fn save_interaction(&self, interaction: &SearchInteraction) -> HubResult<()> {
        put_record(
            self.store.as_ref(),
            store::INTERACTIONS,
            &interaction_key(&interaction.session_id, interaction.sequence),
            interaction,
        )
        .await
    }

    pub async fn mark_resolution_attempted(
        &self,
        session_id: &str,
    ) -> HubResult<DiagnosticSession> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        match session.state {
            SessionState::Open => {
                session.state = SessionState::ResolutionAttempted;
                session.updated_date = Utc::now();
                self.save(&session).await?;
                info!(session_id, "resolution attempted");
                Ok(session)
            }
            SessionState::ResolutionAttempted => Ok(session),
            closed => Err(self.closed(session_id, closed)),
        }
    }

    pub async fn resolve(
        &self,
        session_id: &str,
        successful: bool,
        feedback: Option<SessionFeedback>,
    ) -> HubResult<DiagnosticSession> {
        self.resolve_at(session_id, successful, feedback, Utc::now())
            .await
    }

    /// Resolve with an explicit completion time.
    ///
    /// A successful resolution moves the session to `Resolved` (passing
    /// through `ResolutionAttempted` when still `Open`) and sets
    /// `time_to_resolve`. An unsuccessful one leaves it in
    /// `ResolutionAttempted` with the feedback recorded.
    pub async fn resolve_at(
        &self,
        session_id: &str,
        successful: bool,
        feedback: Option<SessionFeedback>,
        now: DateTime<Utc>,
    ) -> HubResult<DiagnosticSession> {
        if let Some(fb) = &feedback {
            validate_rating(fb.rating)?;
        }
        let lock = self.lock_for(session_id);
        let guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        if session.state.is_terminal() {
            return Err(self.closed(session_id, session.state));
        }

        session.state = SessionState::ResolutionAttempted;
        session.resolution_successful = Some(successful);
        if feedback.is_some() {
            session.user_feedback = feedback;
        }

        if successful {
            let minutes = (now - session.created_date).num_milliseconds() as f64 / 60_000.0;
            if minutes < 0.0 {
                return Err(HubError::InvariantViolation(format!(
                    "session {} would resolve {:.2} minutes before it was created",
                    session_id, -minutes
                )));
            }
            session.state = SessionState::Resolved;
            session.completed_date = Some(now);
            session.time_to_resolve = Some(minutes);
        }
        session.updated_date = now;
        self.save(&session).await?;
        if session.state.is_terminal() {
            self.release_lock(session_id, guard);
        }

        info!(
            session_id,
            state = ?session.state,
            time_to_resolve = ?session.time_to_resolve,
            "session resolution recorded"
        );
        Ok(session)
    }

    pub async fn abandon(
        &self,
        session_id: &str,
        feedback: Option<SessionFeedback>,
    ) -> HubResult<DiagnosticSession> {
        if let Some(fb) = &feedback {
            validate_rating(fb.rating)?;
        }
        let lock = self.lock_for(session_id);
        let guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        if session.state.is_terminal() {
            return Err(self.closed(session_id, session.state));
        }
        let now = Utc::now();
        session.state = SessionState::Abandoned;
        session.completed_date = Some(now);
        session.updated_date = now;
        if feedback.is_some() {
            session.user_feedback = feedback;
        }
        self.save(&session).await?;
        self.release_lock(session_id, guard);
        info!(session_id, "session abandoned");
        Ok(session)
    }

    /// Delete a session and its interactions.
    ///
    /// Only terminal sessions may be deleted unless `force` is set.
    pub async fn delete(&self, session_id: &str, force: bool) -> HubResult<()> {
        let lock = self.lock_for(session_id);
        let guard = lock.lock().await;

        let session = self.load(session_id).await?;
        if !session.state.is_terminal() && !force {
            return Err(HubError::validation(format!(
                "session {} is still {:?}; resolve or abandon it first, or force the delete",
                session_id, session.state
            )));
        }

        let prefix = format!("{}/", session_id);
        for (key, _) in self
            .store
            .list(store::INTERACTIONS, Some(&prefix))
            .await?
        {
            self.store.delete(store::INTERACTIONS, &key).await?;
        }
        self.store.delete(store::SESSIONS, session_id).await?;

        self.release_lock(session_id, guard);
        info!(session_id, force, "session deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Duration;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(InMemoryStore::new()))
    }

    fn interaction(query: &str) -> NewInteraction {
        NewInteraction {
            query: query.into(),
            result_count: 2,
            top_score: 0.8,
            sources: [SourceType::SalesforceCase].into_iter().collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_and_get() {
        let m = manager();
        let s = m.open("kafka lag").await.unwrap();
        assert_eq!(s.state, SessionState::Open);
        assert_eq!(m.get(&s.id).await.unwrap(), s);
        assert!(matches!(
            m.get("missing").await.unwrap_err(),
            HubError::NotFound { .. }
        ));
        assert!(matches!(
            m.open("  ").await.unwrap_err(),
            HubError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_interactions_append_in_order() {
        let m = manager();
        let s = m.open("kafka lag").await.unwrap();
        m.record_interaction(&s.id, interaction("kafka lag"))
            .await
            .unwrap();
        m.record_interaction(&s.id, interaction("kafka consumer lag"))
            .await
            .unwrap();

        let list = m.interactions(&s.id).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].sequence, 0);
        assert_eq!(list[1].query, "kafka consumer lag");

        let session = m.get(&s.id).await.unwrap();
        assert_eq!(session.state, SessionState::Open);
        assert_eq!(session.interaction_count, 2);
        assert!(session
            .knowledge_sources_accessed
            .contains(&SourceType::SalesforceCase));
    }

    #[tokio::test]
    async fn test_interaction_for_unknown_session_is_not_found() {
        let err = manager()
            .record_interaction("nope", interaction("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rating_out_of_range_rejected() {
        let m = manager();
        let s = m.open("q").await.unwrap();
        let mut bad = interaction("q");
        bad.effectiveness_rating = Some(6);
        assert!(matches!(
            m.record_interaction(&s.id, bad).await.unwrap_err(),
            HubError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_time_to_resolve_only_when_resolved() {
        let m = manager();
        let s = m.open("dns flaps").await.unwrap();

        let attempted = m.mark_resolution_attempted(&s.id).await.unwrap();
        assert_eq!(attempted.state, SessionState::ResolutionAttempted);
        assert!(attempted.time_to_resolve.is_none());

        let failed = m.resolve(&s.id, false, None).await.unwrap();
        assert_eq!(failed.state, SessionState::ResolutionAttempted);
        assert_eq!(failed.resolution_successful, Some(false));
        assert!(failed.time_to_resolve.is_none());

        let done = m
            .resolve_at(&s.id, true, None, s.created_date + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(done.state, SessionState::Resolved);
        assert_eq!(done.time_to_resolve, Some(15.0));
        assert!(done.completed_date.is_some());
    }

    #[tokio::test]
    async fn test_resolve_from_open_passes_through_attempted() {
        let m = manager();
        let s = m.open("q").await.unwrap();
        let done = m.resolve(&s.id, true, None).await.unwrap();
        assert_eq!(done.state, SessionState::Resolved);
        assert!(done.time_to_resolve.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_negative_duration_is_invariant_violation() {
        let m = manager();
        let s = m.open("q").await.unwrap();
        let err = m
            .resolve_at(&s.id, true, None, s.created_date - Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InvariantViolation(_)));
        // nothing was persisted
        assert_eq!(m.get(&s.id).await.unwrap().state, SessionState::Open);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let m = manager();
        let s = m.open("q").await.unwrap();
        let abandoned = m.abandon(&s.id, None).await.unwrap();
        assert_eq!(abandoned.state, SessionState::Abandoned);
        assert!(abandoned.time_to_resolve.is_none());

        assert!(m.resolve(&s.id, true, None).await.is_err());
        assert!(m.mark_resolution_attempted(&s.id).await.is_err());
        assert!(m.abandon(&s.id, None).await.is_err());
        assert!(m.record_interaction(&s.id, interaction("q")).await.is_err());
    }

    #[tokio::test]
    async fn test_record_view_tracks_cases() {
        let m = manager();
        let s = m.open("q").await.unwrap();
        m.record_view(&s.id, "doc-1", SourceType::Documentation)
            .await
            .unwrap();
        let s = m
            .record_view(&s.id, "case-1", SourceType::SalesforceCase)
            .await
            .unwrap();
        assert_eq!(s.cases_viewed.len(), 1);
        assert!(s.cases_viewed.contains("case-1"));
        assert_eq!(s.knowledge_sources_accessed.len(), 2);
    }

    #[tokio::test]
    async fn test_views_and_ratings_land_on_latest_interaction() {
        let m = manager();
        let s = m.open("kafka lag").await.unwrap();
        assert!(matches!(
            m.rate_interaction(&s.id, 4).await.unwrap_err(),
            HubError::Validation(_)
        ));

        m.record_interaction(&s.id, interaction("kafka lag"))
            .await
            .unwrap();
        m.record_interaction(&s.id, interaction("kafka consumer lag"))
            .await
            .unwrap();
        m.record_view(&s.id, "doc-7", SourceType::Documentation)
            .await
            .unwrap();
        let rated = m.rate_interaction(&s.id, 4).await.unwrap();
        assert_eq!(rated.sequence, 1);
        assert!(matches!(
            m.rate_interaction(&s.id, 9).await.unwrap_err(),
            HubError::Validation(_)
        ));

        let list = m.interactions(&s.id).await.unwrap();
        assert!(list[0].clicked_results.is_empty());
        assert_eq!(list[0].effectiveness_rating, None);
        assert!(list[1].clicked_results.contains("doc-7"));
        assert_eq!(list[1].effectiveness_rating, Some(4));

        // still allowed once the session is closed
        m.resolve(&s.id, true, None).await.unwrap();
        assert_eq!(m.rate_interaction(&s.id, 5).await.unwrap().effectiveness_rating, Some(5));
    }

    #[tokio::test]
    async fn test_terminal_sessions_release_their_locks() {
        let m = manager();
        let resolved = m.open("dns flap").await.unwrap();
        let abandoned = m.open("redis eviction").await.unwrap();
        let failed = m.open("kafka lag").await.unwrap();
        for s in [&resolved, &abandoned, &failed] {
            m.record_interaction(&s.id, interaction(&s.initial_query))
                .await
                .unwrap();
        }
        assert_eq!(m.locks.len(), 3);

        m.resolve(&resolved.id, true, None).await.unwrap();
        m.abandon(&abandoned.id, None).await.unwrap();
        m.resolve(&failed.id, false, None).await.unwrap();
        assert_eq!(m.locks.len(), 1);
        assert!(m.locks.contains_key(&failed.id));

        // rejected writes and unknown ids leave nothing behind
        assert!(m
            .record_interaction(&resolved.id, interaction("again"))
            .await
            .is_err());
        assert!(m.record_interaction("missing", interaction("x")).await.is_err());
        m.rate_interaction(&abandoned.id, 3).await.unwrap();
        assert_eq!(m.locks.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_terminal_or_force() {
        let m = manager();
        let s = m.open("q").await.unwrap();
        m.record_interaction(&s.id, interaction("q")).await.unwrap();

        assert!(matches!(
            m.delete(&s.id, false).await.unwrap_err(),
            HubError::Validation(_)
        ));
        m.delete(&s.id, true).await.unwrap();
        assert!(m.get(&s.id).await.is_err());
        assert!(m.interactions(&s.id).await.unwrap().is_empty());

        let closed = m.open("q2").await.unwrap();
        m.abandon(&closed.id, None).await.unwrap();
        m.delete(&closed.id, false).await.unwrap();
        assert!(matches!(
            m.delete(&closed.id, false).await.unwrap_err(),
            HubError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_interactions_get_distinct_sequences() {
        let m = Arc::new(manager());
        let s = m.open("q").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let m = m.clone();
            let id = s.id.clone();
            handles.push(tokio::spawn(async move {
                m.record_interaction(&id, interaction(&format!("q{}", i)))
                    .await
                    .unwrap()
                    .sequence
            }));
        }
        let mut seqs = Vec::new();
        for h in handles {
            seqs.push(h.await.unwrap());
        }
        seqs.sort();
        assert_eq!(seqs, (0..8).collect::<Vec<u32>>());
        assert_eq!(m.get(&s.id).await.unwrap().interaction_count, 8);
    }
}
