//! End-to-end tests of the `repochat` binary.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary with an isolated home and no inherited configuration.
fn repochat(home: &Path, cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_repochat"))
        .args(args)
        .current_dir(cwd)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_STATE_HOME", home.join("state"))
        .env_remove("REPOCHAT_CONFIG_CONTENT")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run repochat")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    let output = repochat(home.path(), home.path(), &["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with(&format!("repochat {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    let output = repochat(home.path(), home.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["serve", "chat", "config", "version"] {
        assert!(text.contains(command), "missing {command} in:\n{text}");
    }
}

#[test]
fn test_config_reads_project_file() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("repochat.json"),
        r#"{"maxSteps": 7, "storage": "memory", "server": {"address": "127.0.0.1:4100"}}"#,
    )
    .unwrap();

    let output = repochat(home.path(), project.path(), &["config"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("repochat.json"));
    assert!(text.contains("maxSteps:  7"));
    assert!(text.contains("address:   127.0.0.1:4100"));
    assert!(text.contains("\"storage\": \"memory\""));
}

#[test]
fn test_config_env_content_is_overridden_by_project() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("repochat.json"), r#"{"maxSteps": 9}"#).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_repochat"))
        .arg("config")
        .current_dir(project.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env(
            "REPOCHAT_CONFIG_CONTENT",
            r#"{"model": "anthropic/claude-test", "maxSteps": 3}"#,
        )
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("model:     anthropic/claude-test"));
    assert!(text.contains("maxSteps:  9"));
}

#[test]
fn test_chat_rejects_unknown_mode() {
    let home = TempDir::new().unwrap();
    let output = repochat(home.path(), home.path(), &["chat", "--mode", "durable"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown agent mode"));
}

#[test]
fn test_serve_requires_api_key() {
    let home = TempDir::new().unwrap();
    let output = repochat(
        home.path(),
        home.path(),
        &["serve", "--storage", "memory", "--address", "127.0.0.1:0"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Missing API key for provider: anthropic"));
}
