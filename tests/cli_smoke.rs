//! CLI smoke tests: commands that work without an inference gateway.
//!
//! These tests run the compiled binary against a throwaway data directory
//! and verify exit codes and output.

use std::path::Path;
use std::process::Command;

use gateclaw::session::{Checkpoint, CheckpointStore, LifecycleState, Session};
use tempfile::TempDir;

/// Helper: run gateclaw with given args and return (exit_code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_gateclaw");
    let output = Command::new(bin)
        .args(args)
        .env("RUST_LOG", "off")
        .env("HOME", home)
        .env("GATECLAW_STORAGE_DATA_DIR", home.join("data"))
        .env("GATECLAW_WORKSPACE_ROOT", home.join("workspace"))
        .env_remove("GATECLAW_GOVERNANCE_ENDPOINT")
        .output()
        .expect("failed to execute gateclaw binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("approve"));
}

#[test]
fn cli_version() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_reject_requires_reason() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["reject", "s1"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("--reason"));
}

// ============================================================================
// Tools
// ============================================================================

#[test]
fn cli_tools_list_shows_builtins() {
    let home = TempDir::new().unwrap();
    let (code, stdout, stderr) = run_cli(home.path(), &["tools", "list"]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("read_file"));
    assert!(stdout.contains("delete_file"));
    assert!(stdout.contains("CRITICAL"));
    assert!(stdout.contains("create_tool"));
}

#[test]
fn cli_tools_validate_accepts_clean_source() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("shout.tool");
    std::fs::write(
        &file,
        "@tool\nfn shout(text: str) -> str {\n    # Shout.\n    return upper(text);\n}\n",
    )
    .unwrap();

    let (code, stdout, _) = run_cli(
        home.path(),
        &["tools", "validate", file.to_str().unwrap(), "--tier", "safe"],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("[OK]"));
}

#[test]
fn cli_tools_validate_rejects_file_access_as_safe() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("dump.tool");
    std::fs::write(
        &file,
        "@tool\nfn dump(path: str) -> str {\n    # Dump.\n    return write_file(path, \"x\");\n}\n",
    )
    .unwrap();

    let (code, stdout, _) = run_cli(
        home.path(),
        &["tools", "validate", file.to_str().unwrap(), "--tier", "safe"],
    );
    assert_ne!(code, 0);
    assert!(stdout.contains("[FAIL]"));
    assert!(stdout.contains("file system access"));
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn cli_status_of_unknown_session_fails() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["status", "no-such-session"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("no-such-session"));
}

#[test]
fn cli_sessions_empty() {
    let home = TempDir::new().unwrap();
    let (code, stdout, stderr) = run_cli(home.path(), &["sessions"]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("No sessions."));
}

#[tokio::test]
async fn cli_sessions_lists_stored_checkpoints() {
    let home = TempDir::new().unwrap();
    let store = CheckpointStore::with_path(home.path().join("data").join("sessions")).unwrap();
    let mut session = Session::new("nightly-cleanup");
    session.set_state(LifecycleState::Completed);
    store.put(Checkpoint::new(session, None)).await.unwrap();

    let (code, stdout, stderr) = run_cli(home.path(), &["sessions"]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("nightly-cleanup"));
    assert!(stdout.contains("COMPLETED"));
}
