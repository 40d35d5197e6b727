//! # Knowledge Fusion CLI (`kfuse`)
//!
//! Thin command-line front end over [`KnowledgeHub`].
//!
//! ## Usage
//!
//! ```bash
//! kfuse --config ./config/kfuse.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kfuse init` | Create the SQLite database and schema |
//! | `kfuse sources` | List knowledge sources with entry counts |
//! | `kfuse ingest <dir> --type <source>` | Extract and store every text file in a directory |
//! | `kfuse add <file.json> --type <source>` | Add one entry from JSON |
//! | `kfuse get <source> <id>` | Show one entry |
//! | `kfuse search "<query>"` | Run a unified diagnostic query |
//! | `kfuse extract <file>` | Extract structured knowledge from raw text |
//! | `kfuse feedback ...` | Rate a result |
//! | `kfuse session <action>` | Inspect and close diagnostic sessions |
//! | `kfuse insights` | Learned effectiveness, gaps, and trends |
//! | `kfuse completions <shell>` | Print shell completions |
//!
//! Without a config file everything runs in memory and nothing persists
//! between invocations; set `[db] path` to keep state.
//!
//! Exit status is 2 for invalid input or unknown ids, 1 for other failures.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use knowledge_fusion::config::{self, Config};
use knowledge_fusion::models::{
    ContentType, FeedbackRequest, KnowledgeExtractionRequest, NewKnowledgeEntry, RankedEntry,
    SearchMode, SessionFeedback, SourceType, UnifiedSearchRequest,
};
use knowledge_fusion::{db, ingest, migrate, sources, HubError, KnowledgeHub};

/// Knowledge Fusion CLI: ranked diagnostic answers across cases, code,
/// docs, and search history.
#[derive(Parser)]
#[command(
    name = "kfuse",
    about = "Knowledge Fusion: ranked diagnostic answers across cases, code, docs, and history",
    version,
    long_about = "Knowledge Fusion fans a diagnostic query out to every knowledge source, \
    merges the results into one ranked answer, tracks the troubleshooting session, and \
    learns from feedback which sources help."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kfuse.toml")]
    config: PathBuf,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite database and schema. Idempotent.
    Init,

    /// List knowledge sources with entry counts and categories.
    Sources,

    /// Extract and store every text file under a directory.
    ///
    /// Files already ingested into the same source (by content hash) are skipped.
    Ingest {
        path: PathBuf,

        /// Target source: cases, code, docs, or history.
        #[arg(long = "type")]
        source: String,

        /// Force a content type (case, email, log, documentation) instead
        /// of guessing from the file extension.
        #[arg(long)]
        content_type: Option<String>,

        /// Report what would be added without storing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Add one entry from a JSON file (`title`, `content`, `tags`, ...).
    Add {
        file: PathBuf,

        #[arg(long = "type")]
        source: String,
    },

    /// Show one entry.
    Get { source: String, id: String },

    /// Run a unified diagnostic query.
    Search {
        query: String,

        /// all, cases, code, docs, or history.
        #[arg(long, default_value = "all")]
        mode: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Filter as `key=value` (service, tag, since, status, language, ...).
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract structured knowledge from a raw text file.
    Extract {
        file: PathBuf,

        #[arg(long, default_value = "case")]
        content_type: String,

        /// Store the result in this source after extracting.
        #[arg(long)]
        commit: Option<String>,
    },

    /// Rate a result or suggestion.
    Feedback {
        #[arg(long)]
        session: String,

        #[arg(long)]
        item: String,

        /// case, code, doc, history, or suggestion.
        #[arg(long)]
        item_type: String,

        /// helpful, not_helpful, incorrect, or needs_update.
        #[arg(long)]
        kind: String,

        #[arg(long)]
        rating: Option<u8>,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Inspect and close diagnostic sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show learned source effectiveness, search patterns, gaps, and trends.
    Insights {
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List all sessions.
    List,

    /// Show a session and its interactions.
    Show { id: String },

    /// Record that a result of the latest query was opened.
    View {
        id: String,
        item: String,
        #[arg(long = "type")]
        source: String,
    },

    /// Rate how useful the session's latest query was (1-5).
    Rate { id: String, rating: u8 },

    /// Mark that a fix is being tried.
    Attempt { id: String },

    /// Record a resolution outcome.
    Resolve {
        id: String,

        /// The attempted fix did not work; the session stays open for more attempts.
        #[arg(long)]
        failed: bool,

        #[arg(long)]
        rating: Option<u8>,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Give up on a session.
    Abandon {
        id: String,

        #[arg(long)]
        rating: Option<u8>,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Delete a session and its interactions.
    Delete {
        id: String,

        /// Allow deleting a session that is not yet resolved or abandoned.
        #[arg(long)]
        force: bool,
    },
}

/// Parse a `key=value` pair for `--filter` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("knowledge_fusion=debug,kfuse=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "knowledge_fusion=info".into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the config file, or fall back to in-memory defaults when it is absent.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        warn!(
            path = %path.display(),
            "config file not found, running in memory with defaults"
        );
        Ok(Config::minimal())
    }
}

fn feedback_from(rating: Option<u8>, comment: Option<String>) -> Option<SessionFeedback> {
    if rating.is_none() && comment.is_none() {
        None
    } else {
        Some(SessionFeedback {
            rating,
            comments: comment,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let client_error = e
                .downcast_ref::<HubError>()
                .is_some_and(HubError::is_client_error);
            if client_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "kfuse", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = load_or_default(&cli.config)?;

    if let Commands::Init = cli.command {
        let path = cfg
            .db
            .path
            .as_ref()
            .context("init needs [db] path in the config file")?;
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        pool.close().await;
        println!("Database initialized at {}.", path.display());
        return Ok(());
    }

    let hub = KnowledgeHub::from_config(&cfg).await?;

    match cli.command {
        Commands::Init | Commands::Completions { .. } => {}
        Commands::Sources => {
            sources::print_sources(&hub.sources().await?);
        }
        Commands::Ingest {
            path,
            source,
            content_type,
            dry_run,
        } => {
            let source_type: SourceType = source.parse()?;
            let content_type = content_type
                .map(|c| c.parse::<ContentType>())
                .transpose()?;
            let report =
                ingest::run_ingest(&hub, &path, source_type, content_type, dry_run).await?;

            println!(
                "ingest {}{}",
                source_type,
                if dry_run { " (dry-run)" } else { "" }
            );
            println!("  scanned: {} files", report.scanned);
            println!("  added: {}", report.added);
            println!("  skipped (already ingested): {}", report.duplicates);
            println!("  skipped (empty): {}", report.empty);
            println!("ok");
        }
        Commands::Add { file, source } => {
            let source_type: SourceType = source.parse()?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let entry: NewKnowledgeEntry = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse entry JSON in {}", file.display()))?;
            let id = hub.add_entry(source_type, entry).await?;
            println!("{}", id);
        }
        Commands::Get { source, id } => {
            let source_type: SourceType = source.parse()?;
            let entry = hub.get_entry(source_type, &id).await?;
            println!("--- Entry ---");
            println!("id:                {}", entry.id);
            println!("title:             {}", entry.title);
            println!("source:            {}", entry.source_type);
            println!("confidence:        {:.2}", entry.confidence);
            println!("tags:              {}", entry.tags.join(", "));
            println!(
                "affected_services: {}",
                entry
                    .affected_services
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("created:           {}", entry.created_date.to_rfc3339());
            println!("updated:           {}", entry.updated_date.to_rfc3339());
            println!(
                "metadata:          {}",
                serde_json::to_string(&entry.metadata)?
            );
            println!();
            println!("--- Content ---");
            println!("{}", entry.content);
        }
        Commands::Search {
            query,
            mode,
            limit,
            session,
            filters,
            json,
        } => {
            let request = UnifiedSearchRequest {
                query,
                search_mode: mode.parse::<SearchMode>()?,
                filters: filters.into_iter().collect::<BTreeMap<_, _>>(),
                session_id: session,
                limit,
            };
            let response = hub.query(request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            println!(
                "session: {}",
                response.session_id.as_deref().unwrap_or("-")
            );
            println!(
                "confidence: {:.2}  results: {}",
                response.diagnostic_confidence, response.total_results
            );
            for (source, status) in &response.data_sources {
                println!("  {:<20} {:?}", source.as_str(), status);
            }
            println!();

            if response.total_results == 0 {
                println!("No results.");
            }
            print_section("Cases", &response.case_results);
            print_section("Code", &response.code_results);
            print_section("Docs", &response.doc_results);
            print_section("Previous searches", &response.historical_searches);

            if !response.suggestions.is_empty() {
                println!("Suggestions:");
                for s in &response.suggestions {
                    println!("  - {}", s);
                }
            }
        }
        Commands::Extract {
            file,
            content_type,
            commit,
        } => {
            let raw_content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let request = KnowledgeExtractionRequest {
                raw_content,
                content_type: content_type.parse()?,
            };
            let extracted = hub.extract(&request)?;
            println!("{}", serde_json::to_string_pretty(&extracted)?);

            if let Some(source) = commit {
                let source_type: SourceType = source.parse()?;
                let id = hub.commit_extracted(source_type, extracted).await?;
                println!("stored as {} in {}", id, source_type);
            }
        }
        Commands::Feedback {
            session,
            item,
            item_type,
            kind,
            rating,
            comment,
        } => {
            let record = hub
                .submit_feedback(&FeedbackRequest {
                    session_id: session,
                    item_id: item,
                    item_type,
                    feedback_type: kind,
                    rating,
                    comments: comment,
                })
                .await?;
            println!("feedback {} recorded", record.id);
        }
        Commands::Session { action } => run_session(&hub, action).await?,
        Commands::Insights { json } => {
            let insights = hub.insights().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&insights)?);
                return Ok(());
            }

            println!("Average resolution time: {:.1} min", insights.average_resolution_time);
            println!();
            println!("Most effective sources:");
            for e in &insights.most_effective_sources {
                println!(
                    "  {:<20} {:.2} ({} samples)",
                    e.source_type.as_str(),
                    e.success_rate,
                    e.sample_count
                );
            }
            println!("Common searches:");
            for p in &insights.common_search_patterns {
                println!("  {:>4}  {}", p.count, p.query);
            }
            println!("Knowledge gaps:");
            for g in &insights.knowledge_gaps {
                println!("  {:>4}  {} (best {:.2})", g.occurrences, g.query, g.best_score);
            }
            println!("Trending:");
            for t in &insights.trending_issues {
                println!("  {} ({} recent, {} before)", t.query, t.recent_count, t.prior_count);
            }
        }
    }

    Ok(())
}

async fn run_session(hub: &KnowledgeHub, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::List => {
            let sessions = hub.list_sessions().await?;
            if sessions.is_empty() {
                println!("No sessions.");
            }
            for s in sessions {
                println!(
                    "{}  {:<22} {:>3} queries  {}",
                    s.id,
                    format!("{:?}", s.state),
                    s.interaction_count,
                    s.initial_query
                );
            }
        }
        SessionAction::Show { id } => {
            let session = hub.get_session(&id).await?;
            let interactions = hub.interactions(&id).await?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            println!("--- Interactions ({}) ---", interactions.len());
            for i in interactions {
                println!(
                    "{:>3}. [{:.2}] {} ({} results)",
                    i.sequence, i.top_score, i.query, i.result_count
                );
                if let Some(rating) = i.effectiveness_rating {
                    println!("     rating: {}", rating);
                }
                if !i.clicked_results.is_empty() {
                    println!(
                        "     opened: {}",
                        i.clicked_results.iter().cloned().collect::<Vec<_>>().join(", ")
                    );
                }
            }
        }
        SessionAction::View { id, item, source } => {
            let source_type: SourceType = source.parse()?;
            hub.record_view(&id, &item, source_type).await?;
            println!("ok");
        }
        SessionAction::Rate { id, rating } => {
            let i = hub.rate_interaction(&id, rating).await?;
            println!("rated query {} \"{}\": {}", i.sequence, i.query, rating);
        }
        SessionAction::Attempt { id } => {
            let s = hub.mark_resolution_attempted(&id).await?;
            println!("session {} is {:?}", s.id, s.state);
        }
        SessionAction::Resolve {
            id,
            failed,
            rating,
            comment,
        } => {
            let s = hub
                .resolve_session(&id, !failed, feedback_from(rating, comment))
                .await?;
            match s.time_to_resolve {
                Some(minutes) => println!("session {} resolved in {:.1} min", s.id, minutes),
                None => println!("session {} is {:?}", s.id, s.state),
            }
        }
        SessionAction::Abandon {
            id,
            rating,
            comment,
        } => {
            let s = hub
                .abandon_session(&id, feedback_from(rating, comment))
                .await?;
            println!("session {} is {:?}", s.id, s.state);
        }
        SessionAction::Delete { id, force } => {
            hub.delete_session(&id, force).await?;
            println!("session {} deleted", id);
        }
    }
    Ok(())
}

fn print_section(heading: &str, results: &[RankedEntry]) {
    if results.is_empty() {
        return;
    }
    println!("{}:", heading);
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            r.score,
            r.entry.source_type,
            r.entry.title
        );
        println!("    updated: {}", r.entry.updated_date.format("%Y-%m-%d"));
        if !r.entry.tags.is_empty() {
            println!("    tags: {}", r.entry.tags.join(", "));
        }
        println!("    id: {}", r.entry.id);
        println!();
    }
}
