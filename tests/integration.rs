use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn luminary_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("luminary");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    // Create config
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Create test files
    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("contracts")).unwrap();
    fs::write(
        files_dir.join("lease.txt"),
        "Residential Lease\n\nThe tenant may terminate this lease with ninety days written notice.\n\nRent is payable monthly in advance.",
    )
    .unwrap();
    fs::write(
        files_dir.join("contracts").join("nda.md"),
        "# Mutual NDA\n\nThe receiving party shall keep confidential information secret.\n\nDisclosure to third parties requires written consent.",
    )
    .unwrap();
    fs::write(
        files_dir.join("memo.txt"),
        "Internal memo about indemnification caps and liability limits.",
    )
    .unwrap();
    fs::write(files_dir.join("notes.csv"), "not,ingested\n").unwrap();

    let config_content = format!(
        r#"[storage]
index_path = "{root}/data/index.sqlite"
catalog_path = "{root}/data/catalog.sqlite"

[chunking]
chunk_chars = 500
overlap_chars = 100

[embedding]
provider = "hashing"
dims = 256

[retrieval]
top_k = 5
"#,
        root = root.display()
    );

    let config_path = config_dir.join("luminary.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn files_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

fn run_luminary(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = luminary_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run luminary binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_databases() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_luminary(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Initialized"));
    assert!(tmp.path().join("data").join("index.sqlite").exists());
    assert!(tmp.path().join("data").join("catalog.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_luminary(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_luminary(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_directory() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    let (stdout, stderr, success) =
        run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files found: 3"));
    assert!(stdout.contains("completed: 3 (0 unchanged)"));
    assert!(stdout.contains("contracts/nda.md: completed"));
    assert!(!stdout.contains("notes.csv"));
}

#[test]
fn test_ingest_twice_reports_unchanged() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);
    let (stdout, _, success) = run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("completed: 3 (3 unchanged)"));

    let (stdout, _, _) = run_luminary(&config_path, &["stats"]);
    assert!(stdout.contains("Indexed documents: 3"));
}

#[test]
fn test_add_and_query() {
    let (_tmp, config_path) = setup_test_env();
    let lease = files_dir(&config_path).join("lease.txt");

    let (stdout, stderr, success) = run_luminary(
        &config_path,
        &["add", lease.to_str().unwrap(), "--id", "lease-2024"],
    );
    assert!(success, "add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("lease-2024: completed (1 chunks)"));

    let (stdout, stderr, success) = run_luminary(
        &config_path,
        &["query", "lease-2024", "how does the tenant terminate?"],
    );
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("chunk 0"));
    assert!(stdout.contains("ninety days"));
}

#[test]
fn test_query_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_luminary(&config_path, &["init"]);

    let (_, stderr, success) = run_luminary(&config_path, &["query", "nope", "anything"]);
    assert!(!success);
    assert!(stderr.contains("has no indexed content"), "{}", stderr);
}

#[test]
fn test_add_unsupported_file_fails() {
    let (_tmp, config_path) = setup_test_env();
    let csv = files_dir(&config_path).join("notes.csv");

    let (stdout, _, success) = run_luminary(&config_path, &["add", csv.to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.contains("failed at extraction_failed"));

    let (stdout, _, success) = run_luminary(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("notes.csv"));
    assert!(stdout.contains("failed"));
}

#[test]
fn test_search_json() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (stdout, stderr, success) = run_luminary(
        &config_path,
        &["search", "confidential information disclosure", "--json"],
    );
    assert!(success, "search failed: {}", stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let chunks = parsed["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0]["document_id"], "contracts/nda.md");
}

#[test]
fn test_search_grouped() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (stdout, _, success) =
        run_luminary(&config_path, &["search", "indemnification liability", "--group"]);
    assert!(success);
    assert!(stdout.starts_with("1. ["));
    assert!(stdout.lines().next().unwrap().contains("memo.txt"));
}

#[test]
fn test_compare() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (stdout, stderr, success) =
        run_luminary(&config_path, &["compare", "lease.txt", "memo.txt", "--json"]);
    assert!(success, "compare failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["document_a"], "lease.txt");
    assert!(report["overall_similarity"].as_f64().unwrap() < 0.9);
}

#[test]
fn test_delete_then_get() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (stdout, _, success) = run_luminary(&config_path, &["delete", "memo.txt"]);
    assert!(success);
    assert!(stdout.contains("deleted memo.txt (1 chunk removed)"));

    let (stdout, _, success) = run_luminary(&config_path, &["get", "memo.txt"]);
    assert!(success);
    assert!(stdout.contains("status:       deleted"));

    let (stdout, _, _) = run_luminary(&config_path, &["stats", "--json"]);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["statistics"]["total_documents"], 2);
}

#[test]
fn test_get_shows_retained_text() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (stdout, _, success) = run_luminary(&config_path, &["get", "lease.txt"]);
    assert!(success);
    assert!(stdout.contains("status:       completed"));
    assert!(stdout.contains("--- Text ---"));
    assert!(stdout.contains("Residential Lease\n\nThe tenant may terminate"));
}

#[test]
fn test_rebuild_after_corruption() {
    let (tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);

    let index_path = tmp.path().join("data").join("index.sqlite");
    for suffix in ["-wal", "-shm"] {
        let _ = fs::remove_file(format!("{}{}", index_path.display(), suffix));
    }
    fs::write(&index_path, b"garbage").unwrap();

    let (stdout, _, success) = run_luminary(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Indexed chunks:    0"));
    assert!(stdout.contains("rebuilt empty"));

    let (stdout, stderr, success) = run_luminary(&config_path, &["rebuild"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert!(stdout.contains("documents: 3"));

    let (stdout, _, _) = run_luminary(&config_path, &["query", "lease.txt", "rent"]);
    assert!(stdout.contains("Rent is payable"));
}

#[test]
fn test_reset_requires_confirmation() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    run_luminary(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (_, stderr, success) = run_luminary(&config_path, &["reset"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, _, success) = run_luminary(&config_path, &["reset", "--yes"]);
    assert!(success);
    assert!(stdout.contains("reset ok"));

    let (stdout, _, _) = run_luminary(&config_path, &["list"]);
    assert!(stdout.contains("No documents."));
}
