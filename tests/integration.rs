use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragbase_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ragbase"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("a.txt"), "The sky is blue.").unwrap();
    fs::write(
        files_dir.join("b.md"),
        "# Fruit\n\nBananas are yellow. Apples can be red or green.",
    )
    .unwrap();
    fs::write(
        files_dir.join("c.txt"),
        "Deployment notes.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();
    fs::write(files_dir.join("a2.txt"), "Grass is green.").unwrap();

    let config_content = format!(
        r#"[storage]
data_dir = "{}/data"

[vector]
backend = "sqlite"

[chunking]
chunk_size = 200
overlap = 20

[embedding]
provider = "hashing"
dims = 256

[generation]
provider = "stub"

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("ragbase.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragbase(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragbase_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragbase binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn run_ok(config_path: &Path, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_ragbase(config_path, args);
    assert!(
        success,
        "ragbase {:?} failed: stdout={}, stderr={}",
        args, stdout, stderr
    );
    stdout
}

fn file_arg(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .display()
        .to_string()
}

/// Create `Docs` and upload the given files from the fixture directory.
fn docs_with(config_path: &Path, files: &[&str]) {
    run_ok(config_path, &["kb", "create", "Docs"]);
    for name in files {
        let path = file_arg(config_path, name);
        run_ok(config_path, &["file", "upload", "Docs", &path]);
    }
}

fn retrieve_json(config_path: &Path, query: &str, extra: &[&str]) -> serde_json::Value {
    let mut args = vec!["retrieve", "Docs", query];
    args.extend_from_slice(extra);
    let stdout = run_ok(config_path, &args);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = run_ok(&config_path, &["init"]);
    assert!(stdout.contains("Initialized"));
    run_ok(&config_path, &["init"]);
}

#[test]
fn test_retrieve_sky_scenario() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt"]);

    let stdout = run_ok(&config_path, &["index", "Docs"]);
    assert!(stdout.contains("Indexed a.txt: 1 chunks"));

    let json = retrieve_json(&config_path, "What color is the sky?", &[]);
    let contexts = json["contexts"].as_array().unwrap();
    assert!(!contexts.is_empty());
    assert_eq!(contexts[0]["filename"], "a.txt");
    assert!(contexts[0]["text"]
        .as_str()
        .unwrap()
        .contains("The sky is blue."));
}

#[test]
fn test_chat_returns_answer_and_contexts() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt"]);
    run_ok(&config_path, &["index", "Docs"]);

    let history_path = config_path.parent().unwrap().join("history.json");
    fs::write(
        &history_path,
        r#"[{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]"#,
    )
    .unwrap();

    let stdout = run_ok(
        &config_path,
        &[
            "chat",
            "Docs",
            "What color is the sky?",
            "--history",
            history_path.to_str().unwrap(),
        ],
    );
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(!json["response"].as_str().unwrap().is_empty());
    let contexts = json["contexts"].as_array().unwrap();
    assert!(contexts
        .iter()
        .any(|c| c["filename"] == "a.txt" && c["text"].as_str().unwrap().contains("blue")));
}

#[test]
fn test_doc_count_tracks_uploads() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt", "b.md", "c.txt"]);

    let stdout = run_ok(&config_path, &["kb", "list"]);
    assert!(stdout.lines().any(|l| l == "Docs\t3"), "got: {}", stdout);

    run_ok(&config_path, &["file", "delete", "Docs", "b.md"]);
    let stdout = run_ok(&config_path, &["kb", "list"]);
    assert!(stdout.lines().any(|l| l == "Docs\t2"), "got: {}", stdout);
}

#[test]
fn test_duplicate_create_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["kb", "create", "Docs"]);

    let (_, stderr, success) = run_ragbase(&config_path, &["kb", "create", "Docs"]);
    assert!(!success);
    assert!(stderr.contains("already exists"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_kb_name_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_ragbase(&config_path, &["kb", "create", "no spaces"]);
    assert!(!success);
    assert!(stderr.contains("invalid input"), "stderr: {}", stderr);
}

#[test]
fn test_reupload_overwrites_previous_content() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt"]);
    run_ok(&config_path, &["index", "Docs"]);

    let replacement = file_arg(&config_path, "a2.txt");
    let stdout = run_ok(
        &config_path,
        &["file", "upload", "Docs", &replacement, "--name", "a.txt"],
    );
    assert!(stdout.contains("Replaced a.txt"));

    // Stale chunks were purged on upload.
    let json = retrieve_json(&config_path, "sky", &[]);
    assert!(json["contexts"].as_array().unwrap().is_empty());

    run_ok(&config_path, &["index", "Docs", "a.txt"]);
    let json = retrieve_json(&config_path, "What color is the grass?", &[]);
    let contexts = json["contexts"].as_array().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0]["text"], "Grass is green.");

    let stdout = run_ok(&config_path, &["kb", "list"]);
    assert!(stdout.lines().any(|l| l == "Docs\t1"));
}

#[test]
fn test_file_delete_purges_chunks() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt", "b.md"]);
    run_ok(&config_path, &["index", "Docs"]);

    let stdout = run_ok(&config_path, &["file", "delete", "Docs", "a.txt"]);
    assert!(stdout.contains("1 chunks removed"), "got: {}", stdout);

    let json = retrieve_json(&config_path, "What color is the sky?", &[]);
    let contexts = json["contexts"].as_array().unwrap();
    assert!(contexts.iter().all(|c| c["filename"] != "a.txt"));

    let (_, stderr, success) = run_ragbase(&config_path, &["file", "delete", "Docs", "a.txt"]);
    assert!(!success);
    assert!(stderr.contains("file not found"), "stderr: {}", stderr);
}

#[test]
fn test_retrieve_respects_top_k() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt", "b.md", "c.txt"]);
    run_ok(&config_path, &["index", "Docs"]);

    let json = retrieve_json(&config_path, "blue green yellow docker", &["--top-k", "2"]);
    assert_eq!(json["contexts"].as_array().unwrap().len(), 2);

    let json = retrieve_json(&config_path, "blue", &["--top-k", "0"]);
    assert!(json["contexts"].as_array().unwrap().is_empty());
}

#[test]
fn test_delete_is_permanent_across_processes() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt"]);
    run_ok(&config_path, &["index", "Docs"]);

    let stdout = run_ok(&config_path, &["kb", "delete", "Docs"]);
    assert!(stdout.contains("Deleted knowledge base Docs"));

    let stdout = run_ok(&config_path, &["kb", "list"]);
    assert!(!stdout.contains("Docs"));

    let (_, stderr, success) = run_ragbase(&config_path, &["retrieve", "Docs", "sky"]);
    assert!(!success);
    assert!(stderr.contains("knowledge base not found"), "stderr: {}", stderr);

    // Recreating starts from nothing; no chunks survive the deletion.
    run_ok(&config_path, &["kb", "create", "Docs"]);
    let json = retrieve_json(&config_path, "What color is the sky?", &[]);
    assert!(json["contexts"].as_array().unwrap().is_empty());
    let stdout = run_ok(&config_path, &["kb", "list"]);
    assert!(stdout.lines().any(|l| l == "Docs\t0"));
}

#[test]
fn test_reconcile_runs_clean() {
    let (_tmp, config_path) = setup_test_env();
    docs_with(&config_path, &["a.txt"]);
    run_ok(&config_path, &["index", "Docs"]);

    let stdout = run_ok(&config_path, &["reconcile"]);
    assert!(stdout.contains("Docs: removed 0 chunks from 0 files"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(
        &config_path,
        "[chunking]\nchunk_size = 100\noverlap = 100\n",
    )
    .unwrap();

    let (_, stderr, success) = run_ragbase(&config_path, &["kb", "list"]);
    assert!(!success);
    assert!(stderr.contains("chunking"), "stderr: {}", stderr);
}
