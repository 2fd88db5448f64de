use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kbg_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kbg"))
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    config_path: PathBuf,
}

fn setup_test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Two revisions of one regulation plus an unrelated one.
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("인사규정_20250101.txt"),
        "제1조 (목적) 이 규정은 인사에 관한 사항을 정한다.",
    )
    .unwrap();
    fs::write(
        files_dir.join("인사규정_20260101.txt"),
        "제1조 (목적) 이 규정은 인사 및 복무에 관한 사항을 정한다.",
    )
    .unwrap();
    fs::write(
        files_dir.join("출장비 지급 기준.txt"),
        "국내 출장 일비는 2만원으로 한다.",
    )
    .unwrap();
    fs::write(files_dir.join("~$인사규정.txt"), "lock file").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/kb.sqlite"

[storage]
data_dir = "{root}/data"

[corpus_store]
provider = "directory"
root = "{root}/corpora"

[generation]
provider = "disabled"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kbg.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        _tmp: tmp,
        root,
        config_path,
    }
}

fn run_kbg(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kbg_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbg binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn upload_files(env: &TestEnv) -> String {
    let files = env.root.join("files");
    let (stdout, stderr, success) = run_kbg(&env.config_path, &["upload", files.to_str().unwrap()]);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

/// Document id on the `documents` line that mentions `file`.
fn doc_id_for(documents_stdout: &str, file: &str) -> String {
    documents_stdout
        .lines()
        .find(|l| l.contains(file))
        .and_then(|l| l.split_whitespace().find(|t| t.starts_with("doc_")))
        .unwrap_or_else(|| panic!("no document line for {}:\n{}", file, documents_stdout))
        .to_string()
}

fn is_marked_latest(documents_stdout: &str, file: &str) -> bool {
    documents_stdout
        .lines()
        .find(|l| l.contains(file))
        .map(|l| l.trim_start().starts_with('*'))
        .unwrap_or(false)
}

#[test]
fn test_init_creates_database_and_corpora() {
    let env = setup_test_env();

    let (stdout, stderr, success) = run_kbg(&env.config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(env.root.join("data/kb.sqlite").exists());
    assert!(env.root.join("corpora/regulations-primary").is_dir());
    assert!(env.root.join("corpora/regulations-corrections").is_dir());
}

#[test]
fn test_init_idempotent() {
    let env = setup_test_env();

    let (_, _, success1) = run_kbg(&env.config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kbg(&env.config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_upload_directory_skips_lock_files() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);

    let stdout = upload_files(&env);
    assert!(stdout.contains("3/3 files ingested"), "stdout={}", stdout);
    assert!(!stdout.contains("~$"));
    assert!(env
        .root
        .join("corpora/regulations-primary/인사규정_20260101.txt")
        .exists());
}

#[test]
fn test_newer_revision_is_latest() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);
    upload_files(&env);

    let (stdout, _, success) = run_kbg(&env.config_path, &["documents"]);
    assert!(success);
    assert!(stdout.contains("인사규정\n"), "stdout={}", stdout);
    assert!(is_marked_latest(&stdout, "인사규정_20260101.txt"));
    assert!(!is_marked_latest(&stdout, "인사규정_20250101.txt"));
    assert!(is_marked_latest(&stdout, "출장비 지급 기준.txt"));
    assert!(stdout.contains("3 documents in 2 groups"));
}

#[test]
fn test_documents_search() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);
    upload_files(&env);

    let (stdout, _, success) = run_kbg(&env.config_path, &["documents", "--search", "출장"]);
    assert!(success);
    assert!(stdout.contains("출장비 지급 기준.txt"));
    assert!(!stdout.contains("인사규정"));
}

#[test]
fn test_duplicate_upload_is_skipped() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);
    upload_files(&env);

    let stdout = upload_files(&env);
    assert!(stdout.contains("0/3 files ingested"), "stdout={}", stdout);
    assert_eq!(stdout.matches("skipped").count(), 3);
}

#[test]
fn test_set_latest_overrides_dates() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);
    upload_files(&env);

    let (listing, _, _) = run_kbg(&env.config_path, &["documents"]);
    let older = doc_id_for(&listing, "인사규정_20250101.txt");

    let (stdout, stderr, success) = run_kbg(&env.config_path, &["set-latest", &older]);
    assert!(success, "set-latest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("is now latest"));

    let (stdout, _, _) = run_kbg(&env.config_path, &["group", "인사규정"]);
    assert!(is_marked_latest(&stdout, "인사규정_20250101.txt"));
    assert!(!is_marked_latest(&stdout, "인사규정_20260101.txt"));
    assert_eq!(stdout.lines().filter(|l| l.trim_start().starts_with('*')).count(), 1);
}

#[test]
fn test_set_latest_unknown_document_fails() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);

    let (_, stderr, success) = run_kbg(&env.config_path, &["set-latest", "doc_missing"]);
    assert!(!success);
    assert!(stderr.contains("doc_missing"), "stderr={}", stderr);
}

#[test]
fn test_unknown_group_fails() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);

    let (_, stderr, success) = run_kbg(&env.config_path, &["group", "없는규정"]);
    assert!(!success);
    assert!(stderr.contains("없는규정"));
}

#[test]
fn test_sync_reconciles_with_store() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);
    upload_files(&env);

    // Drop one file out of band, add another.
    let primary = env.root.join("corpora/regulations-primary");
    fs::remove_file(primary.join("출장비 지급 기준.txt")).unwrap();
    fs::write(primary.join("보안규정_20240301.txt"), "제1조").unwrap();

    let (stdout, stderr, success) = run_kbg(&env.config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("added: 1"), "stdout={}", stdout);
    assert!(stdout.contains("removed: 1"));
    assert!(stdout.contains("ok"));

    let (listing, _, _) = run_kbg(&env.config_path, &["documents"]);
    assert!(!listing.contains("출장비"));
    assert!(is_marked_latest(&listing, "보안규정_20240301.txt"));

    // Second pass has nothing to do.
    let (stdout, _, _) = run_kbg(&env.config_path, &["sync"]);
    assert!(stdout.contains("added: 0"));
    assert!(stdout.contains("removed: 0"));
}

#[test]
fn test_sync_list() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);
    upload_files(&env);

    let (stdout, _, success) = run_kbg(&env.config_path, &["sync", "--list"]);
    assert!(success);
    assert!(stdout.contains("regulations-primary (regulations-primary): 3 documents"));
    assert!(stdout.contains("regulations-corrections (regulations-corrections): 0 documents"));
}

#[test]
fn test_sync_reset_clears_everything() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);
    upload_files(&env);

    let (stdout, stderr, success) = run_kbg(&env.config_path, &["sync", "--reset"]);
    assert!(success, "reset failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("remote documents removed: 3"));
    assert!(stdout.contains("registry rows cleared: 3"));

    let (stdout, _, _) = run_kbg(&env.config_path, &["documents"]);
    assert!(stdout.contains("No documents registered."));
}

#[test]
fn test_corrections_stats_empty() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);

    let (stdout, _, success) = run_kbg(&env.config_path, &["corrections", "stats"]);
    assert!(success);
    assert!(stdout.contains("pending:    0"));
    assert!(stdout.contains("total:      0"));

    let (stdout, _, success) = run_kbg(&env.config_path, &["corrections", "list"]);
    assert!(success);
    assert!(stdout.contains("No corrections."));
}

#[test]
fn test_review_of_unknown_correction_fails() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);

    let (_, stderr, success) = run_kbg(
        &env.config_path,
        &["corrections", "reject", "corr_missing", "--reviewer", "admin", "--reason", "dup"],
    );
    assert!(!success);
    assert!(stderr.contains("corr_missing"));

    let (_, _, success) = run_kbg(
        &env.config_path,
        &["corrections", "approve", "corr_missing", "--reviewer", "admin"],
    );
    assert!(!success);
}

#[test]
fn test_ask_without_generation_fails() {
    let env = setup_test_env();
    run_kbg(&env.config_path, &["init"]);

    let (_, stderr, success) = run_kbg(&env.config_path, &["ask", "출장 일비는?"]);
    assert!(!success);
    assert!(stderr.contains("Failed to answer"), "stderr={}", stderr);
}

#[test]
fn test_unknown_corpus_type_rejected() {
    let env = setup_test_env();
    let files = env.root.join("files");

    let (_, stderr, success) = run_kbg(
        &env.config_path,
        &["upload", files.to_str().unwrap(), "--corpus", "archive"],
    );
    assert!(!success);
    assert!(stderr.contains("archive"));
}

#[test]
fn test_bad_config_reports_error() {
    let env = setup_test_env();
    fs::write(&env.config_path, "[db]\npath = \"kb.sqlite\"\n").unwrap();

    let (_, stderr, success) = run_kbg(&env.config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("corpus_store.root"));
}

#[test]
fn test_example_config_parses() {
    let config = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/kbg.example.toml");
    let content = fs::read_to_string(&config).unwrap();
    assert!(content.contains("[corpus_store]"));

    let env = setup_test_env();
    // Point the example at the temp dir so init has somewhere to write.
    let local = content
        .replace("./data", &env.root.join("data").display().to_string())
        .replace("./corpora", &env.root.join("corpora").display().to_string());
    fs::write(&env.config_path, local).unwrap();

    let (stdout, stderr, success) = run_kbg(&env.config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
}
