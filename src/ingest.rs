//! Bulk ingestion of text files into a knowledge source.
//!
//! Walks a directory, runs the extractor over every matching file, and
//! commits the results through the target source's adapter. A file whose
//! SHA-256 content hash was already ingested into the same source is
//! skipped, so re-running an ingest over an unchanged tree is a no-op.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::hub::KnowledgeHub;
use crate::models::{ContentType, KnowledgeExtractionRequest, SourceType};
use crate::store::{get_record, put_record};

/// Store collection mapping `<source_type>/<content hash>` to an entry id.
pub const INGESTED: &str = "ingested";

const DEFAULT_INCLUDES: &[&str] = &["**/*.txt", "**/*.md", "**/*.log", "**/*.eml"];
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IngestMarker {
    entry_id: String,
    relative_path: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub scanned: usize,
    pub added: usize,
    pub duplicates: usize,
    pub empty: usize,
    pub entry_ids: Vec<String>,
}

/// Text files under `root` matching the include globs, sorted by path.
pub fn scan_files(root: &Path) -> Result<Vec<ScannedFile>> {
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(DEFAULT_INCLUDES)?;
    let exclude_set = build_globset(DEFAULT_EXCLUDES)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let body = match std::fs::read_to_string(path) {
            Ok(body) => body,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        files.push(ScannedFile {
            path: path.to_path_buf(),
            relative_path: rel_str,
            body,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Content type implied by a file extension.
pub fn content_type_for(path: &Path) -> ContentType {
    match path.extension().and_then(|e| e.to_str()) {
        Some("eml") => ContentType::Email,
        Some("log") => ContentType::Log,
        Some("md") => ContentType::Documentation,
        _ => ContentType::Case,
    }
}

pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract and commit every new file under `root` into `source_type`.
///
/// `content_type` overrides the per-extension guess when given.
pub async fn run_ingest(
    hub: &KnowledgeHub,
    root: &Path,
    source_type: SourceType,
    content_type: Option<ContentType>,
    dry_run: bool,
) -> Result<IngestReport> {
    let files = scan_files(root)?;
    let store = hub.store();
    let mut report = IngestReport {
        scanned: files.len(),
        ..Default::default()
    };

    for file in &files {
        if file.body.trim().is_empty() {
            report.empty += 1;
            continue;
        }

        let marker_key = format!("{}/{}", source_type.as_str(), content_hash(&file.body));
        if get_record::<IngestMarker>(store.as_ref(), INGESTED, &marker_key)
            .await?
            .is_some()
        {
            report.duplicates += 1;
            continue;
        }
        if dry_run {
            report.added += 1;
            continue;
        }

        let request = KnowledgeExtractionRequest {
            raw_content: file.body.clone(),
            content_type: content_type.unwrap_or_else(|| content_type_for(&file.path)),
        };
        let mut extracted = hub.extract(&request)?;
        if extracted.title.is_none() {
            extracted.title = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string());
        }

        let mut entry = extracted.into_entry();
        entry.metadata.insert(
            "source_path".to_string(),
            serde_json::Value::String(file.relative_path.clone()),
        );
        let entry_id = hub.add_entry(source_type, entry).await?;

        put_record(
            store.as_ref(),
            INGESTED,
            &marker_key,
            &IngestMarker {
                entry_id: entry_id.clone(),
                relative_path: file.relative_path.clone(),
            },
        )
        .await?;
        report.added += 1;
        report.entry_ids.push(entry_id);
    }

    info!(
        source = %source_type,
        scanned = report.scanned,
        added = report.added,
        duplicates = report.duplicates,
        "ingest complete"
    );
    Ok(report)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
