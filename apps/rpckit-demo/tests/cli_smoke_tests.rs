#![allow(clippy::unwrap_used, clippy::expect_used, clippy::use_debug)]

//! CLI smoke tests for the rpckit-demo binary.

use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn run_demo(args: &[&str]) -> std::process::Output {
    run_demo_with_env(args, &[])
}

fn run_demo_with_env(args: &[&str], env: &[(&str, &str)]) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rpckit-demo"));
    cmd.args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.output().expect("Failed to execute rpckit-demo")
}

fn write_config(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_cli_help_command() {
    let output = run_demo(&["--help"]);
    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"), "Should contain usage information");
    assert!(stdout.contains("run"), "Should contain 'run' subcommand");
    assert!(stdout.contains("check"), "Should contain 'check' subcommand");
    assert!(stdout.contains("--config"), "Should mention config option");
}

#[test]
fn test_cli_version_command() {
    let output = run_demo(&["--version"]);
    assert!(output.status.success(), "Version command should succeed");
    assert!(String::from_utf8_lossy(&output.stdout).contains("rpckit-demo"));
}

#[test]
fn test_cli_invalid_command() {
    let output = run_demo(&["explode"]);
    assert!(!output.status.success(), "Unknown subcommand should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized subcommand") || stderr.contains("error"));
}

#[test]
fn test_cli_config_validation_missing_file() {
    let output = run_demo(&["--config", "/nonexistent/config.yaml", "check"]);
    assert!(!output.status.success(), "Missing config should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("config file does not exist"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_cli_config_validation_invalid_yaml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "service: [unclosed\n  export: :::\n");
    let output = run_demo(&["--config", &path, "check"]);
    assert!(!output.status.success(), "Invalid YAML should fail");
}

#[test]
fn test_cli_check_valid_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
logging:
  level: warn
service:
  export: "rpc:21000"
  group: blue
  protocols:
    - id: rpc
  registries:
    - protocol: local
reference:
  group: blue
  registries:
    - protocol: local
"#,
    );
    let output = run_demo(&["--config", &path, "check"]);
    assert!(
        output.status.success(),
        "check should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration is valid"));
    assert!(stdout.contains("rpc:21000"));
}

#[test]
fn test_cli_check_rejects_undeclared_protocol() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "service:\n  export: \"grpc:9000\"\n");
    let output = run_demo(&["--config", &path, "check"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("grpc"));
}

#[test]
fn test_cli_print_config() {
    let output = run_demo(&["--print-config"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Effective configuration:"));
    assert!(stdout.contains("rpc:20880"));
}

#[test]
fn test_cli_env_overrides_yaml() {
    let output = run_demo_with_env(
        &["--print-config"],
        &[("RPCKIT__SERVICE__EXPORT", "rpc:23456")],
    );
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("rpc:23456"));
}

#[test]
fn test_cli_run_once_calls_the_service() {
    let output = run_demo(&["run", "--once"]);
    assert!(
        output.status.success(),
        "run --once should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("add(2, 3) = 5"), "stdout: {stdout}");
    assert!(stdout.contains("echo(\"hello\") = \"hello\""), "stdout: {stdout}");
}

#[test]
fn test_cli_run_once_json_logs() {
    let output = run_demo_with_env(
        &["-v", "run", "--once"],
        &[("RPCKIT__LOGGING__FORMAT", "json")],
    );
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    let first = stderr.lines().find(|l| l.starts_with('{')).expect("json log line");
    let value: serde_json::Value = serde_json::from_str(first).unwrap();
    assert!(value.get("level").is_some());
}

#[test]
fn test_cli_run_with_broken_export_fails() {
    let output = run_demo_with_env(
        &["run", "--once"],
        &[("RPCKIT__SERVICE__EXPORT", "rpc:notaport")],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("service.export"));
}

#[tokio::test]
async fn test_cli_no_arguments_serves_until_interrupted() {
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_rpckit-demo"));
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn().unwrap();

    let result = timeout(Duration::from_secs(2), child.wait_with_output()).await;
    assert!(result.is_err(), "default run should keep serving");
}
