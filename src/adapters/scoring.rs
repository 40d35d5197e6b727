//! Pluggable relevance scoring.
//!
//! Adapters never compare scores with each other, so a scorer only has to
//! be consistent within one adapter's result set. The fusion coordinator
//! min-max normalizes whatever comes back.

use std::collections::BTreeSet;

use crate::models::KnowledgeEntry;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "how", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "what",
    "when", "where", "which", "why", "with",
];

/// Split text into lowercase search terms.
///
/// Terms are runs of alphanumerics, `-` and `_`. Stop words and
/// single-character terms are dropped. Order is preserved, duplicates removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|t| t.trim_matches(|c: char| c == '-' || c == '_'))
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(|t| t.to_string())
        .collect()
}

fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Per-field weights for [`KeywordScorer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeights {
    pub title: f64,
    pub tags: f64,
    pub services: f64,
    pub metadata: f64,
    pub content: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 3.0,
            tags: 2.5,
            services: 2.5,
            metadata: 1.0,
            content: 1.0,
        }
    }
}

/// Scores an entry against a query. Higher is better; 0.0 means no match.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, entry: &KnowledgeEntry) -> f64;
}

/// Weighted term-overlap scorer.
///
/// `raw = Σ_term Σ_field weight(field) · [term ∈ field]`, scaled by
/// `0.5 + 0.5 · confidence` so low-confidence entries sink within a source.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer {
    pub weights: FieldWeights,
}

impl KeywordScorer {
    pub fn new(weights: FieldWeights) -> Self {
        Self { weights }
    }
}

impl RelevanceScorer for KeywordScorer {
    fn score(&self, query: &str, entry: &KnowledgeEntry) -> f64 {
        let terms = tokenize(query);
        if terms.is_empty() {
            return 0.0;
        }

        let title = token_set(&entry.title);
        let content = token_set(&entry.content);
        let tags: BTreeSet<String> = entry.tags.iter().flat_map(|t| tokenize(t)).collect();
        let services: BTreeSet<String> = entry
            .affected_services
            .iter()
            .flat_map(|s| tokenize(s))
            .collect();
        let metadata: BTreeSet<String> = entry
            .metadata
            .values()
            .flat_map(|v| match v {
                serde_json::Value::String(s) => tokenize(s),
                other => tokenize(&other.to_string()),
            })
            .collect();

        let w = &self.weights;
        let raw: f64 = terms
            .iter()
            .map(|term| {
                let mut s = 0.0;
                if title.contains(term) {
                    s += w.title;
                }
                if tags.contains(term) {
                    s += w.tags;
                }
                if services.contains(term) {
                    s += w.services;
                }
                if metadata.contains(term) {
                    s += w.metadata;
                }
                if content.contains(term) {
                    s += w.content;
                }
                s
            })
            .sum();

        raw * (0.5 + 0.5 * entry.confidence.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use chrono::Utc;

    fn entry(title: &str, content: &str, tags: &[&str], confidence: f64) -> KnowledgeEntry {
        let now = Utc::now();
        KnowledgeEntry {
            id: "e1".into(),
            source_type: SourceType::SalesforceCase,
            title: title.into(),
            content: content.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            affected_services: Default::default(),
            created_date: now,
            updated_date: now,
            confidence,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_tokenize_drops_stop_words_and_duplicates() {
        assert_eq!(
            tokenize("The Cassandra connection to the cassandra cluster, failed!"),
            vec!["cassandra", "connection", "cluster", "failed"]
        );
        assert_eq!(tokenize("payments-api 500"), vec!["payments-api", "500"]);
        assert!(tokenize("a I to").is_empty());
    }

    #[test]
    fn test_title_and_tag_hits_outscore_content_hits() {
        let scorer = KeywordScorer::default();
        let titled = entry("Cassandra Timeout Incident", "", &["cassandra"], 1.0);
        let body_only = entry("Unrelated", "cassandra mentioned once", &[], 1.0);
        assert!(
            scorer.score("cassandra failure", &titled) > scorer.score("cassandra failure", &body_only)
        );
    }

    #[test]
    fn test_no_overlap_scores_zero() {
        let scorer = KeywordScorer::default();
        let doc = entry("Kafka Consumer Lag", "partitions rebalance", &["kafka"], 1.0);
        assert_eq!(scorer.score("cassandra database connection failed", &doc), 0.0);
    }

    #[test]
    fn test_confidence_scales_score() {
        let scorer = KeywordScorer::default();
        let sure = entry("redis eviction", "", &[], 1.0);
        let unsure = entry("redis eviction", "", &[], 0.0);
        let s1 = scorer.score("redis", &sure);
        let s0 = scorer.score("redis", &unsure);
        assert!((s0 - s1 * 0.5).abs() < 1e-9);
    }
}
