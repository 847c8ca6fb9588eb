use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn lumo_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lumo");
    path
}

/// Writes a config whose API key variable is never set, so chat runs
/// against the disabled provider.
fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    setup_with_llm("api_key_env = \"LUMO_CLI_TEST_UNSET_KEY\"", extra)
}

fn setup_with_llm(llm: &str, extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/lumo.sqlite"

[server]
bind = "127.0.0.1:7340"

[llm]
{}
{}
"#,
        root.display(),
        llm,
        extra
    );

    let config_path = config_dir.join("lumo.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lumo(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_lumo_with(config_path, args, &[], None)
}

fn run_lumo_with(
    config_path: &Path,
    args: &[&str],
    env: &[(&str, &str)],
    cwd: Option<&Path>,
) -> (String, String, bool) {
    let binary = lumo_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG");
    for (k, v) in env {
        cmd.env(k, v);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lumo binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_lumo(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/lumo.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, success1) = run_lumo(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_lumo(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_lumo(&tmp.path().join("nope.toml"), &["personas"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_personas_lists_builtins_and_inline() {
    let (_tmp, config_path) = setup_test_env(
        r#"
[personas.inline.reviewer]
name = "Reviewer"
description = "Reviews pull requests"
system_prompt = "You review code changes."
"#,
    );

    let (stdout, stderr, success) = run_lumo(&config_path, &["personas"]);
    assert!(success, "personas failed: {}", stderr);
    for id in [
        "general",
        "code-master",
        "creative-writer",
        "data-scientist",
        "language-tutor",
        "reviewer",
    ] {
        assert!(stdout.contains(id), "missing persona {}: {}", id, stdout);
    }
}

#[test]
fn test_history_empty() {
    let (_tmp, config_path) = setup_test_env("");
    run_lumo(&config_path, &["init"]);

    let (stdout, _, success) = run_lumo(&config_path, &["history", "list"]);
    assert!(success);
    assert!(stdout.contains("No conversations."));

    let (_, stderr, success) = run_lumo(&config_path, &["history", "show", "missing-id"]);
    assert!(!success);
    assert!(stderr.contains("conversation not found: missing-id"));

    let (_, stderr, success) = run_lumo(&config_path, &["history", "delete", "missing-id"]);
    assert!(!success);
    assert!(stderr.contains("conversation not found"));
}

#[test]
fn test_chat_without_api_key_fails() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, stderr, success) = run_lumo(&config_path, &["chat", "hello"]);
    assert!(!success);
    assert!(
        stderr.contains("API key is not configured"),
        "stderr: {}",
        stderr
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_save_and_history() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "Use a virtual environment." },
                "finish_reason": "stop"
            }]
        })))
        .mount(&mock)
        .await;

    let (_tmp, config_path) = setup_with_llm(
        &format!(
            "base_url = \"{}\"\napi_key_env = \"LUMO_CLI_TEST_KEY\"",
            mock.uri()
        ),
        "",
    );

    let cfg = config_path.clone();
    let outputs = tokio::task::spawn_blocking(move || {
        let env = [("LUMO_CLI_TEST_KEY", "sk-test")];
        let chat = run_lumo_with(
            &cfg,
            &[
                "chat",
                "How do I install python packages?",
                "--persona",
                "code-master",
                "--save",
            ],
            &env,
            None,
        );
        let list = run_lumo_with(&cfg, &["history", "list"], &env, None);
        let search = run_lumo_with(&cfg, &["history", "search", "PYTHON"], &env, None);
        (chat, list, search)
    })
    .await
    .unwrap();

    let ((stdout, stderr, success), (list, _, _), (search, _, _)) = outputs;
    assert!(success, "chat failed: {}", stderr);
    assert!(stdout.contains("Use a virtual environment."));
    assert!(stderr.contains("Saved conversation"));

    assert!(list.contains("How do I install python packages?"));
    assert!(search.contains("How do I install python packages?"));

    let requests = mock.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["messages"][0]["role"], "system");
    assert!(sent["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("Code Master"));
}

#[test]
fn test_analyze_csv() {
    let (tmp, config_path) = setup_test_env("");
    let csv = tmp.path().join("sales.csv");
    fs::write(&csv, "region,total\nnorth,10\n").unwrap();

    let (stdout, stderr, success) = run_lumo(&config_path, &["analyze", csv.to_str().unwrap()]);
    assert!(success, "analyze failed: {}", stderr);
    assert!(stdout.contains("- Name: sales.csv"));
    assert!(stdout.contains("--- Sheet: Sheet1 ---"));
    assert!(stdout.contains("north,10"));
}

#[test]
fn test_theme_set_show_toggle() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, _, success) = run_lumo(&config_path, &["theme", "show"]);
    assert!(success);
    assert!(stdout.contains("(lumo-light)"));

    let (stdout, _, success) = run_lumo(&config_path, &["theme", "set", "ocean-breeze"]);
    assert!(success);
    assert!(stdout.contains("ocean-breeze"));

    let (stdout, _, _) = run_lumo(&config_path, &["theme", "list"]);
    assert!(stdout
        .lines()
        .any(|l| l.starts_with('*') && l.contains("ocean-breeze")));

    let (stdout, _, success) = run_lumo(&config_path, &["theme", "toggle"]);
    assert!(success);
    assert!(stdout.contains("lumo-dark"));

    let (stdout, _, success) = run_lumo(&config_path, &["theme", "css"]);
    assert!(success);
    assert!(stdout.starts_with(":root {"));
    assert!(stdout.contains("color-scheme: dark;"));

    let (_, stderr, success) = run_lumo(&config_path, &["theme", "set", "neon"]);
    assert!(!success);
    assert!(stderr.contains("theme not found: neon"));
}

#[test]
fn test_theme_init_respects_saved_choice() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_lumo(&config_path, &["theme", "init", "--prefer-dark"]);
    assert!(success, "theme init failed: {}", stderr);
    assert!(stdout.contains("Theme set to Lumo Dark (lumo-dark)"));

    let (stdout, _, success) = run_lumo(&config_path, &["theme", "init"]);
    assert!(success);
    assert!(stdout.contains("(lumo-dark)"));
}

#[test]
fn test_download_writes_file() {
    let (tmp, config_path) = setup_test_env("");
    let input = tmp.path().join("answer.md");
    fs::write(&input, "# Summary\n\n**Bold** point and `code`.").unwrap();

    let (stdout, stderr, success) = run_lumo_with(
        &config_path,
        &["download", input.to_str().unwrap(), "--format", "txt"],
        &[],
        Some(tmp.path()),
    );
    assert!(success, "download failed: {}", stderr);
    assert!(stdout.contains("Wrote lumo-ai-response.txt"));

    let written = fs::read_to_string(tmp.path().join("lumo-ai-response.txt")).unwrap();
    assert!(written.starts_with("Lumo AI Response\nGenerated on: "));
    assert!(written.contains("Bold point and code."));
    assert!(!written.contains("**"));
}

#[test]
fn test_download_suggests_formats() {
    let (tmp, config_path) = setup_test_env("");
    let input = tmp.path().join("table.md");
    fs::write(&input, "| a | b |\n| 1 | 2 |").unwrap();

    let (stdout, _, success) =
        run_lumo(&config_path, &["download", input.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("Suggested formats: xlsx"));

    let (_, stderr, success) = run_lumo(
        &config_path,
        &["download", input.to_str().unwrap(), "--format", "rtf"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid download format"));
}
