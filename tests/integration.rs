use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn srag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_srag"))
}

const DOCUMENTS: &str = r#"{"id": "T-1", "source_type": "ticket", "text": "I was charged twice for my March invoice. The duplicate charge needs a refund.", "created_at": "2025-03-03T10:00:00Z", "customer_id": "C-1"}
{"id": "T-2", "source_type": "ticket", "text": "Cannot login because the password reset email never arrives.", "created_at": "2025-03-05T08:30:00Z", "customer_id": "C-1"}
{"id": "N-9", "source_type": "note", "text": "Customer asked about a refund for a duplicate charge on the annual plan.", "created_at": "2025-02-01T12:00:00Z", "customer_id": "C-2"}
"#;

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_path = root.join("documents.jsonl");
    fs::write(&docs_path, DOCUMENTS).unwrap();

    let config_content = format!(
        r#"[index]
path = "{}/data/index.json"

[retrieval]
k = 5
min_score = 0.2

[embedding]
provider = "hashing"
dims = 1024
"#,
        root.display()
    );

    let config_path = config_dir.join("srag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, docs_path)
}

fn run_srag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = srag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run srag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn index_documents(config_path: &Path, docs_path: &Path) -> String {
    let (stdout, stderr, success) = run_srag(config_path, &["index", docs_path.to_str().unwrap()]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

fn stats_json(config_path: &Path) -> serde_json::Value {
    let (stdout, stderr, success) = run_srag(config_path, &["stats", "--json"]);
    assert!(success, "stats failed: {}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_index_creates_index_file() {
    let (tmp, config_path, docs_path) = setup_test_env();

    let stdout = index_documents(&config_path, &docs_path);
    assert!(stdout.contains("documents: 3"));
    assert!(stdout.contains("failed: 0"));
    assert!(tmp.path().join("data/index.json").exists());

    let stats = stats_json(&config_path);
    assert_eq!(stats["documents"], 3);
    assert_eq!(stats["customers"], 2);
    assert_eq!(stats["dims"], 1024);
    assert_eq!(stats["model_versions"]["hashing-1024d"], 3);
}

#[test]
fn test_index_idempotent() {
    let (_tmp, config_path, docs_path) = setup_test_env();

    index_documents(&config_path, &docs_path);
    let stdout = index_documents(&config_path, &docs_path);
    assert!(stdout.contains("embedded: 0"), "got: {}", stdout);
    assert!(stdout.contains("unchanged: 3"), "got: {}", stdout);
    assert_eq!(stats_json(&config_path)["entries"], 3);
}

#[test]
fn test_index_dry_run_writes_nothing() {
    let (tmp, config_path, docs_path) = setup_test_env();

    let (stdout, _, success) =
        run_srag(&config_path, &["index", docs_path.to_str().unwrap(), "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("to embed: 3"));
    assert!(!tmp.path().join("data/index.json").exists());
}

#[test]
fn test_search_is_scoped_to_customer() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    index_documents(&config_path, &docs_path);

    let (stdout, stderr, success) = run_srag(
        &config_path,
        &["search", "refund duplicate charge", "--customer", "C-1", "--json"],
    );
    assert!(success, "search failed: {}", stderr);
    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(!results.is_empty());
    for r in &results {
        assert_eq!(r["customer_id"], "C-1");
        assert_eq!(r["chunk"]["document_id"], "T-1");
    }
    assert_eq!(results[0]["rank"], 1);
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    index_documents(&config_path, &docs_path);

    let args = ["search", "charge", "--customer", "C-1", "--min-score=-1"];
    let (first, _, _) = run_srag(&config_path, &args);
    let (second, _, _) = run_srag(&config_path, &args);
    assert_eq!(first, second);
    assert!(first.contains("1. ["));
}

#[test]
fn test_search_unknown_customer_has_no_results() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    index_documents(&config_path, &docs_path);

    let (stdout, _, success) = run_srag(&config_path, &["search", "refund", "--customer", "nobody"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_delete_document() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    index_documents(&config_path, &docs_path);

    let (stdout, _, success) = run_srag(&config_path, &["delete", "T-1"]);
    assert!(success);
    assert!(stdout.contains("Deleted 1 entries for document T-1."));
    assert_eq!(stats_json(&config_path)["documents"], 2);

    let (stdout, _, success) = run_srag(&config_path, &["delete", "T-1"]);
    assert!(success);
    assert!(stdout.contains("No entries found"));
}

#[test]
fn test_reembed_with_current_model_is_noop() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    index_documents(&config_path, &docs_path);

    let (stdout, _, success) = run_srag(&config_path, &["reembed"]);
    assert!(success);
    assert!(stdout.contains("all entries up to date"));
}

#[test]
fn test_ask_requires_generation_provider() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    index_documents(&config_path, &docs_path);

    let (_, stderr, success) = run_srag(&config_path, &["ask", "refund", "--customer", "C-1"]);
    assert!(!success);
    assert!(stderr.contains("Generation provider is disabled"));
}

#[test]
fn test_missing_index_is_reported() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, stderr, success) = run_srag(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("srag index"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[index]\npath = \"x\"\n[retrieval]\nk = 0\n").unwrap();

    let (_, stderr, success) = run_srag(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("retrieval"));
}
