//! Fusion coordinator: concurrent fan-out, normalization, and merge.
//!
//! # Fan-out
//!
//! Every adapter selected by the request's [`SearchMode`] runs as its own
//! tokio task. The coordinator waits on each task against one shared
//! deadline (`fusion.deadline_ms`); a task still running when the deadline
//! passes is aborted and reported as `timeout`, a task that fails or panics
//! is reported as `error`. Neither fails the query.
//!
//! # Ranking
//!
//! ```text
//! normalized = (raw - min) / (max - min)     per adapter result set
//!                                           (1.0 when max == min)
//! score      = normalized × effectiveness   (1.0 with no feedback yet)
//! ```
//!
//! Results are sorted by `score` desc, then `updated_date` desc, then
//! `(source_type, id)` asc, so the merge is identical regardless of which
//! adapter finished first. Repeated `(source_type, id)` pairs keep their
//! best-ranked occurrence. History entries recording the current query are
//! dropped before ranking, and history never counts toward
//! `diagnostic_confidence`.
//!
//! [`SearchMode`]: crate::models::SearchMode

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterHit, AdapterRegistry, Filters};
use crate::config::FusionConfig;
use crate::error::{HubError, HubResult};
use crate::models::{
    RankedEntry, SearchMode, SourceEffectiveness, SourceStatus, SourceType,
    UnifiedSearchRequest, UnifiedSearchResponse,
};

/// Read access to learned source effectiveness.
#[async_trait]
pub trait EffectivenessReader: Send + Sync {
    async fn effectiveness(&self, source_type: SourceType) -> HubResult<SourceEffectiveness>;
}

/// Reader that reports no history for any source, i.e. pure relevance ranking.
pub struct UniformEffectiveness;

#[async_trait]
impl EffectivenessReader for UniformEffectiveness {
    async fn effectiveness(&self, source_type: SourceType) -> HubResult<SourceEffectiveness> {
        Ok(SourceEffectiveness::empty(source_type))
    }
}

/// Hits returned by one adapter that answered in time.
#[derive(Debug, Clone)]
pub struct SourceResults {
    pub source_type: SourceType,
    pub hits: Vec<AdapterHit>,
}

pub struct FusionCoordinator {
    registry: Arc<AdapterRegistry>,
    effectiveness: Arc<dyn EffectivenessReader>,
    config: FusionConfig,
}

impl FusionCoordinator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        effectiveness: Arc<dyn EffectivenessReader>,
        config: FusionConfig,
    ) -> Self {
        Self {
            registry,
            effectiveness,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Resolve the request limit against the configured default and maximum.
    pub fn effective_limit(&self, requested: Option<usize>) -> HubResult<usize> {
        match requested {
            Some(0) => Err(HubError::validation("limit must be >= 1")),
            Some(n) => Ok(n.min(self.config.max_limit)),
            None => Ok(self.config.default_limit),
        }
    }

    /// Run a unified query under the configured deadline.
    pub async fn query(&self, request: &UnifiedSearchRequest) -> HubResult<UnifiedSearchResponse> {
        self.query_with_deadline(request, Duration::from_millis(self.config.deadline_ms))
            .await
    }

    pub async fn query_with_deadline(
        &self,
        request: &UnifiedSearchRequest,
        deadline: Duration,
    ) -> HubResult<UnifiedSearchResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(HubError::validation("query must not be empty"));
        }
        validate_filters(&request.filters)?;
        let limit = self.effective_limit(request.limit)?;

        let started = Instant::now();
        let (mut results, data_sources) = self
            .fan_out(query, request.search_mode, &request.filters, limit, deadline)
            .await;
        drop_query_echoes(&mut results, query);

        let mut weights = BTreeMap::new();
        for r in &results {
            let weight = match self.effectiveness.effectiveness(r.source_type).await {
                Ok(eff) => eff.weight(),
                Err(e) => {
                    warn!(source = %r.source_type, error = %e, "effectiveness lookup failed, using 1.0");
                    1.0
                }
            };
            weights.insert(r.source_type, weight);
        }

        let merged = merge_results(&results, &weights, limit);
        let suggestions = build_suggestions(query, &merged, self.config.max_suggestions);
        let mut response = partition(query, merged, data_sources);
        response.suggestions = suggestions;

        info!(
            query = %query,
            total_results = response.total_results,
            diagnostic_confidence = response.diagnostic_confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fusion query complete"
        );
        Ok(response)
    }

    async fn fan_out(
        &self,
        query: &str,
        mode: SearchMode,
        filters: &Filters,
        limit: usize,
        deadline: Duration,
    ) -> (Vec<SourceResults>, BTreeMap<SourceType, SourceStatus>) {
        let deadline_at = Instant::now() + deadline;

        let tasks: Vec<(SourceType, JoinHandle<HubResult<Vec<AdapterHit>>>)> = self
            .registry
            .for_mode(mode)
            .into_iter()
            .map(|adapter| {
                let source_type = adapter.source_type();
                let query = query.to_string();
                let filters = filters.clone();
                debug!(source = adapter.name(), "dispatching search");
                let handle =
                    tokio::spawn(async move { adapter.search(&query, &filters, limit).await });
                (source_type, handle)
            })
            .collect();

        let mut results = Vec::new();
        let mut statuses = BTreeMap::new();

        // Tasks run concurrently; waiting on them in turn against the same
        // instant bounds the whole fan-out by one deadline.
        for (source_type, mut handle) in tasks {
            let status = match tokio::time::timeout_at(deadline_at, &mut handle).await {
                Ok(Ok(Ok(hits))) => {
                    debug!(source = %source_type, hits = hits.len(), "source answered");
                    results.push(SourceResults { source_type, hits });
                    SourceStatus::Ok
                }
                Ok(Ok(Err(e))) => {
                    warn!(source = %source_type, error = %e, "source failed");
                    SourceStatus::Error
                }
                Ok(Err(join_err)) => {
                    warn!(source = %source_type, error = %join_err, "source task aborted");
                    SourceStatus::Error
                }
                Err(_) => {
                    handle.abort();
                    let err = HubError::AdapterTimeout {
                        source_name: source_type.to_string(),
                        budget_ms: deadline.as_millis() as u64,
                    };
                    warn!(source = %source_type, "{}", err);
                    SourceStatus::Timeout
                }
            };
            statuses.insert(source_type, status);
        }

        (results, statuses)
    }
}

/// Reject filters every adapter would fail on, before dispatch.
fn validate_filters(filters: &Filters) -> HubResult<()> {
    if let Some(since) = filters.get("since") {
        NaiveDate::parse_from_str(since, "%Y-%m-%d").map_err(|_| {
            HubError::validation(format!("since must be YYYY-MM-DD, got '{}'", since))
        })?;
    }
    Ok(())
}

/// Drop history entries that record this same query (after normalization).
pub fn drop_query_echoes(results: &mut [SourceResults], query: &str) {
    let current = normalize_query(query);
    for r in results
        .iter_mut()
        .filter(|r| r.source_type == SourceType::HistoricalSearch)
    {
        r.hits
            .retain(|h| normalize_query(&h.entry.title) != current);
    }
}

/// Min-max normalize one adapter's raw scores into `[0, 1]`.
pub fn normalize_scores(hits: &[AdapterHit]) -> Vec<f64> {
    if hits.is_empty() {
        return Vec::new();
    }

    let s_min = hits.iter().map(|h| h.raw_score).fold(f64::INFINITY, f64::min);
    let s_max = hits
        .iter()
        .map(|h| h.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|h| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (h.raw_score - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Normalize, weight, order, deduplicate, and cap the adapter outputs.
///
/// Pure and deterministic: the same outputs in any order give the same list.
pub fn merge_results(
    results: &[SourceResults],
    weights: &BTreeMap<SourceType, f64>,
    limit: usize,
) -> Vec<RankedEntry> {
    let mut ranked: Vec<RankedEntry> = Vec::new();
    for r in results {
        let effectiveness = weights.get(&r.source_type).copied().unwrap_or(1.0);
        for (hit, normalized_score) in r.hits.iter().zip(normalize_scores(&r.hits)) {
            ranked.push(RankedEntry {
                entry: hit.entry.clone(),
                raw_score: hit.raw_score,
                normalized_score,
                effectiveness,
                score: normalized_score * effectiveness,
            });
        }
    }

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.entry.updated_date.cmp(&a.entry.updated_date))
            .then(a.entry.source_type.cmp(&b.entry.source_type))
            .then(a.entry.id.cmp(&b.entry.id))
            .then(
                b.raw_score
                    .partial_cmp(&a.raw_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut seen = BTreeSet::new();
    ranked.retain(|r| seen.insert((r.entry.source_type, r.entry.id.clone())));
    ranked.truncate(limit);
    ranked
}

/// Split the merged list into per-source categories, preserving rank order.
///
/// `diagnostic_confidence` is the best score among knowledge entries; past
/// queries are listed but never count as an answer.
pub fn partition(
    query: &str,
    merged: Vec<RankedEntry>,
    data_sources: BTreeMap<SourceType, SourceStatus>,
) -> UnifiedSearchResponse {
    let diagnostic_confidence = merged
        .iter()
        .filter(|r| r.entry.source_type != SourceType::HistoricalSearch)
        .map(|r| r.score)
        .fold(0.0, f64::max);
    let total_results = merged.len();

    let mut response = UnifiedSearchResponse {
        query: query.to_string(),
        total_results,
        diagnostic_confidence,
        data_sources,
        ..Default::default()
    };
    for r in merged {
        match r.entry.source_type {
            SourceType::SalesforceCase => response.case_results.push(r),
            SourceType::CodeKnowledge => response.code_results.push(r),
            SourceType::Documentation => response.doc_results.push(r),
            SourceType::HistoricalSearch => response.historical_searches.push(r),
        }
    }
    response
}

/// Resolution notes of ranked cases and prior queries of ranked history
/// entries, in rank order, without repeats.
pub fn build_suggestions(query: &str, merged: &[RankedEntry], max: usize) -> Vec<String> {
    let current = normalize_query(query);
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    for r in merged {
        if out.len() >= max {
            break;
        }
        let candidate = match r.entry.source_type {
            SourceType::SalesforceCase => r.entry.metadata_str("resolution"),
            SourceType::HistoricalSearch => {
                Some(r.entry.title.clone()).filter(|t| normalize_query(t) != current)
            }
            _ => None,
        };
        if let Some(text) = candidate.map(|t| t.trim().to_string()) {
            if !text.is_empty() && seen.insert(normalize_query(&text)) {
                out.push(text);
            }
        }
    }
    out
}

/// Lowercase with runs of whitespace collapsed to one space.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
