//! Source adapter listing for `kfuse sources`.

use serde::Serialize;

use crate::adapters::AdapterRegistry;
use crate::error::HubResult;
use crate::models::SourceType;

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub source_type: SourceType,
    pub name: String,
    pub description: String,
    pub entries: usize,
    pub categories: Vec<String>,
}

pub async fn collect_sources(registry: &AdapterRegistry) -> HubResult<Vec<SourceInfo>> {
    let mut out = Vec::new();
    for adapter in registry.adapters() {
        out.push(SourceInfo {
            source_type: adapter.source_type(),
            name: adapter.name().to_string(),
            description: adapter.description().to_string(),
            entries: adapter.count().await?,
            categories: adapter.list_categories().await?.into_iter().collect(),
        });
    }
    Ok(out)
}

pub fn print_sources(sources: &[SourceInfo]) {
    println!("{:<20} {:>8}  CATEGORIES", "SOURCE", "ENTRIES");
    for s in sources {
        let categories = if s.categories.is_empty() {
            "-".to_string()
        } else {
            s.categories.join(", ")
        };
        println!("{:<20} {:>8}  {}", s.name, s.entries, categories);
    }
}
