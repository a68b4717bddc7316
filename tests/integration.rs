use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn tutor_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tutor");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("transcricoes.txt"),
        "Aula 1. A reciprocidade gera confiança.\n\nAula 2. O plano de tratamento deve ser simples.",
    )
    .unwrap();

    let hash = tutor_chat::auth::hash_password("N4nd@M4c#2025").unwrap();
    let config_content = format!(
        r#"[db]
path = "{root}/data/logs.sqlite"

[index]
dir = "{root}/storage"
transcript = "{root}/transcricoes.txt"

[auth]
username = "aluno1"
password_hash = "{hash}"
secret_key = "integration-test-secret-0123456789"
admin_users = ["aluno1"]

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display(),
        hash = hash,
    );

    let config_path = config_dir.join("tutor.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tutor(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tutor_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tutor binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tutor(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/logs.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_tutor(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tutor(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_stats_on_empty_log() {
    let (_tmp, config_path) = setup_test_env();
    run_tutor(&config_path, &["init"]);

    let (stdout, stderr, success) = run_tutor(&config_path, &["stats"]);
    assert!(success, "stats failed: stderr={}", stderr);
    assert!(stdout.contains("Questions:     0"));
    assert!(stdout.contains("Users:         0"));
}

#[test]
fn test_missing_config_fails() {
    let (stdout, stderr, success) = run_tutor(Path::new("/nonexistent/tutor.toml"), &["init"]);
    assert!(!success, "expected failure: stdout={}", stdout);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_serve_requires_api_key() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tutor(&config_path, &["serve"]);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"));
}

#[test]
fn test_index_build_requires_api_key() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tutor(&config_path, &["index", "build"]);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"));
    assert!(!tmp.path().join("storage").exists());
}

#[test]
fn test_hash_password_from_stdin() {
    let mut child = Command::new(tutor_binary())
        .arg("hash-password")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"N4nd@M4c#2025\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert!(hash.starts_with("$argon2id$"), "unexpected hash: {}", hash);
    assert!(tutor_chat::auth::verify_password("N4nd@M4c#2025", &hash));
}

#[test]
fn test_hash_password_rejects_empty_input() {
    let mut child = Command::new(tutor_binary())
        .arg("hash-password")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    drop(child.stdin.take());
    let output = child.wait_with_output().unwrap();
    assert!(!output.status.success());
}
