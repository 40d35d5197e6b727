//! TOML configuration.
//!
//! Every ranking weight and insight threshold is policy, so all of them are
//! exposed here with defaults. A file may contain only the sections it wants
//! to override:
//!
//! ```toml
//! [db]
//! path = "./data/kfuse.sqlite"
//!
//! [fusion]
//! deadline_ms = 1500
//!
//! [learning]
//! knowledge_gap_threshold = 0.25
//!
//! [extraction]
//! services = ["cassandra", "kafka", "payments-api"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Storage location. Without a `path` everything lives in memory.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DbConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FusionConfig {
    /// Overall fan-out deadline shared by all adapters.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
    /// Store every query as a `historical_search` entry.
    #[serde(default = "default_true")]
    pub record_history: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            max_suggestions: default_max_suggestions(),
            record_history: true,
        }
    }
}

fn default_deadline_ms() -> u64 {
    2000
}
fn default_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    100
}
fn default_max_suggestions() -> usize {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LearningConfig {
    /// Sources with fewer samples are left out of `most_effective_sources`.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Queries whose best score stays below this are gap candidates.
    #[serde(default = "default_gap_threshold")]
    pub knowledge_gap_threshold: f64,
    #[serde(default = "default_trending_window_hours")]
    pub trending_window_hours: i64,
    /// Recent-window count must exceed prior-window count by this factor.
    #[serde(default = "default_trending_ratio")]
    pub trending_ratio: f64,
    /// Minimum recent occurrences for a query with no prior history to trend.
    #[serde(default = "default_trending_min_count")]
    pub trending_min_count: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            top_k: default_top_k(),
            knowledge_gap_threshold: default_gap_threshold(),
            trending_window_hours: default_trending_window_hours(),
            trending_ratio: default_trending_ratio(),
            trending_min_count: default_trending_min_count(),
        }
    }
}

fn default_min_samples() -> u64 {
    3
}
fn default_top_k() -> usize {
    5
}
fn default_gap_threshold() -> f64 {
    0.3
}
fn default_trending_window_hours() -> i64 {
    24
}
fn default_trending_ratio() -> f64 {
    2.0
}
fn default_trending_min_count() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Service-name dictionary matched against raw content.
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    #[serde(default = "default_max_description_chars")]
    pub max_description_chars: usize,
    /// Confidence given to entries added without one.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            services: default_services(),
            max_description_chars: default_max_description_chars(),
            default_confidence: default_confidence(),
        }
    }
}

fn default_services() -> Vec<String> {
    [
        "cassandra",
        "kafka",
        "redis",
        "postgres",
        "mysql",
        "elasticsearch",
        "kubernetes",
        "nginx",
        "rabbitmq",
        "zookeeper",
        "s3",
        "dns",
        "auth",
        "payments",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_description_chars() -> usize {
    2000
}
fn default_confidence() -> f64 {
    0.5
}

impl Config {
    /// All-defaults, in-memory configuration for commands run without a file.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.fusion.deadline_ms == 0 {
            anyhow::bail!("fusion.deadline_ms must be > 0");
        }
        if self.fusion.default_limit == 0 {
            anyhow::bail!("fusion.default_limit must be >= 1");
        }
        if self.fusion.default_limit > self.fusion.max_limit {
            anyhow::bail!("fusion.default_limit must not exceed fusion.max_limit");
        }
        if self.learning.min_samples == 0 {
            anyhow::bail!("learning.min_samples must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.learning.knowledge_gap_threshold) {
            anyhow::bail!("learning.knowledge_gap_threshold must be in [0.0, 1.0]");
        }
        if self.learning.trending_window_hours <= 0 {
            anyhow::bail!("learning.trending_window_hours must be > 0");
        }
        if self.learning.trending_ratio < 1.0 {
            anyhow::bail!("learning.trending_ratio must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.extraction.default_confidence) {
            anyhow::bail!("extraction.default_confidence must be in [0.0, 1.0]");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert!(config.db.path.is_none());
        assert_eq!(config.fusion.deadline_ms, 2000);
        assert_eq!(config.learning.min_samples, 3);
        assert!(config.extraction.services.contains(&"cassandra".to_string()));
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
[fusion]
deadline_ms = 500

[learning]
trending_ratio = 3.0
"#,
        )
        .unwrap();
        assert_eq!(config.fusion.deadline_ms, 500);
        assert_eq!(config.fusion.default_limit, 10);
        assert_eq!(config.learning.trending_ratio, 3.0);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let config: Config = toml::from_str(
            r#"
[learning]
knowledge_gap_threshold = 1.5
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_limit_above_max() {
        let config: Config = toml::from_str(
            r#"
[fusion]
default_limit = 50
max_limit = 20
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/kfuse.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
