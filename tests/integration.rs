use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kfuse_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kfuse");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let cases_dir = root.join("cases");
    fs::create_dir_all(&cases_dir).unwrap();
    fs::write(
        cases_dir.join("cassandra.txt"),
        "Title: Cassandra Timeout Incident\n\
         Customers report the checkout page is failing.\n\
         ERROR: cassandra read timeout after 5000ms\n\
         This is a critical outage affecting payments.\n",
    )
    .unwrap();
    fs::write(
        cases_dir.join("kafka.txt"),
        "Title: Kafka consumer lag\nConsumers fall behind during peak hours.\n",
    )
    .unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("redis.md"),
        "# Redis failover runbook\n\nPromote the replica and update the DNS record.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/kfuse.sqlite"

[fusion]
deadline_ms = 2000
record_history = true
"#,
        root.display()
    );

    let config_path = config_dir.join("kfuse.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kfuse(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kfuse_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kfuse binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest_fixtures(tmp: &TempDir, config_path: &Path) {
    let cases = tmp.path().join("cases");
    let docs = tmp.path().join("docs");
    let (stdout, stderr, success) = run_kfuse(
        config_path,
        &["ingest", cases.to_str().unwrap(), "--type", "cases"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    let (_, _, success) = run_kfuse(
        config_path,
        &["ingest", docs.to_str().unwrap(), "--type", "docs"],
    );
    assert!(success);
}

fn search_json(config_path: &Path, query: &str) -> serde_json::Value {
    let (stdout, stderr, success) = run_kfuse(config_path, &["search", query, "--json"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kfuse(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kfuse(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kfuse(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_counts_and_skips_repeats() {
    let (tmp, config_path) = setup_test_env();
    let cases = tmp.path().join("cases");

    let (stdout, _, success) = run_kfuse(
        &config_path,
        &["ingest", cases.to_str().unwrap(), "--type", "cases"],
    );
    assert!(success);
    assert!(stdout.contains("added: 2"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_kfuse(
        &config_path,
        &["ingest", cases.to_str().unwrap(), "--type", "cases"],
    );
    assert!(success);
    assert!(stdout.contains("added: 0"));
    assert!(stdout.contains("skipped (already ingested): 2"));
}

#[test]
fn test_sources_lists_entry_counts() {
    let (tmp, config_path) = setup_test_env();
    ingest_fixtures(&tmp, &config_path);

    let (stdout, _, success) = run_kfuse(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("salesforce_case"));
    assert!(stdout.contains("documentation"));
    assert!(stdout.contains("code_knowledge"));
}

#[test]
fn test_search_ranks_matching_case() {
    let (tmp, config_path) = setup_test_env();
    ingest_fixtures(&tmp, &config_path);

    let response = search_json(&config_path, "cassandra timeout");
    let cases = response["case_results"].as_array().unwrap();
    assert!(!cases.is_empty());
    assert_eq!(cases[0]["entry"]["title"], "Cassandra Timeout Incident");
    assert!(response["diagnostic_confidence"].as_f64().unwrap() > 0.0);
    assert_eq!(response["data_sources"]["salesforce_case"], "ok");
    assert!(response["session_id"].is_string());
}

#[test]
fn test_search_text_output() {
    let (tmp, config_path) = setup_test_env();
    ingest_fixtures(&tmp, &config_path);

    let (stdout, _, success) = run_kfuse(&config_path, &["search", "redis failover"]);
    assert!(success);
    assert!(stdout.contains("Docs:"));
    assert!(stdout.contains("Redis failover runbook"));
}

#[test]
fn test_empty_query_exits_with_client_error() {
    let (_tmp, config_path) = setup_test_env();

    let output = Command::new(kfuse_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["search", "   "])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("query must not be empty"));
}

#[test]
fn test_unknown_source_type_fails() {
    let (tmp, config_path) = setup_test_env();
    let cases = tmp.path().join("cases");
    let (_, stderr, success) = run_kfuse(
        &config_path,
        &["ingest", cases.to_str().unwrap(), "--type", "tickets"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown source type"));
}

#[test]
fn test_session_feedback_and_insights_flow() {
    let (tmp, config_path) = setup_test_env();
    ingest_fixtures(&tmp, &config_path);

    let response = search_json(&config_path, "cassandra timeout");
    let session_id = response["session_id"].as_str().unwrap().to_string();
    let case_id = response["case_results"][0]["entry"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (_, stderr, success) = run_kfuse(
        &config_path,
        &[
            "feedback",
            "--session",
            &session_id,
            "--item",
            &case_id,
            "--item-type",
            "case",
            "--kind",
            "helpful",
            "--rating",
            "5",
        ],
    );
    assert!(success, "feedback failed: {}", stderr);

    let (_, _, success) = run_kfuse(
        &config_path,
        &["session", "view", &session_id, &case_id, "--type", "cases"],
    );
    assert!(success);

    let (_, _, success) = run_kfuse(&config_path, &["session", "rate", &session_id, "4"]);
    assert!(success);
    let (stdout, _, success) = run_kfuse(&config_path, &["session", "show", &session_id]);
    assert!(success);
    assert!(stdout.contains("rating: 4"));
    assert!(stdout.contains(&format!("opened: {}", case_id)));

    let (stdout, _, success) = run_kfuse(&config_path, &["session", "resolve", &session_id]);
    assert!(success);
    assert!(stdout.contains("resolved in"));

    let (stdout, _, success) = run_kfuse(&config_path, &["session", "list"]);
    assert!(success);
    assert!(stdout.contains(&session_id));
    assert!(stdout.contains("Resolved"));

    let (stdout, _, success) = run_kfuse(&config_path, &["insights", "--json"]);
    assert!(success);
    let insights: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(insights["success_rate_by_source"]["salesforce_case"], 1.0);
}

#[test]
fn test_delete_open_session_requires_force() {
    let (tmp, config_path) = setup_test_env();
    ingest_fixtures(&tmp, &config_path);

    let response = search_json(&config_path, "kafka lag");
    let session_id = response["session_id"].as_str().unwrap().to_string();

    let (_, _, success) = run_kfuse(&config_path, &["session", "delete", &session_id]);
    assert!(!success);

    let (stdout, _, success) =
        run_kfuse(&config_path, &["session", "delete", &session_id, "--force"]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (_, _, success) = run_kfuse(&config_path, &["session", "show", &session_id]);
    assert!(!success);
}

#[test]
fn test_extract_prints_structured_fields() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("cases").join("cassandra.txt");

    let (stdout, _, success) = run_kfuse(
        &config_path,
        &["extract", file.to_str().unwrap(), "--content-type", "case"],
    );
    assert!(success);
    let extracted: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(extracted["title"], "Cassandra Timeout Incident");
    assert_eq!(extracted["severity"], "critical");
    assert!(extracted["affected_services"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == "cassandra"));
}

#[test]
fn test_add_and_get_entry() {
    let (tmp, config_path) = setup_test_env();
    let entry_file = tmp.path().join("entry.json");
    fs::write(
        &entry_file,
        r#"{"title": "Retry budget for payments-api", "content": "Use exponential backoff.", "tags": ["payments"]}"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_kfuse(
        &config_path,
        &["add", entry_file.to_str().unwrap(), "--type", "code"],
    );
    assert!(success, "add failed: {}", stderr);
    let id = stdout.trim().to_string();

    let (stdout, _, success) = run_kfuse(&config_path, &["get", "code", &id]);
    assert!(success);
    assert!(stdout.contains("Retry budget for payments-api"));
    assert!(stdout.contains("Use exponential backoff."));
}
