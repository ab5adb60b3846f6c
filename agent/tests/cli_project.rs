//! CLI tests for the `devagent` binary.
//!
//! Spawns the binary against a temp workspace and verifies exit codes. Oracle
//! backends point at a closed local port so every request fails fast.

use std::fs;
use std::path::Path;
use std::process::Command;

use devagent::exit_codes;
use devagent::io::config::{AgentConfig, write_config};

const UNREACHABLE: &str = "http://127.0.0.1:9/v1/chat/completions";

fn offline_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.ide.mock = true;
    config.oracle.timeout_secs = 2;
    for backend in [
        &mut config.oracle.high,
        &mut config.oracle.mid,
        &mut config.oracle.local,
    ] {
        backend.endpoint = UNREACHABLE.to_string();
        backend.api_key_env = None;
    }
    config
}

fn devagent(workdir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_devagent"));
    cmd.arg("--workdir")
        .arg(workdir)
        .env_remove("CURSOR_API_URL")
        .env_remove("USE_MOCK_RESPONSES")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn project_without_oracle_reports_no_instructions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workdir = temp.path().join("project");
    write_config(
        &workdir.join(".agent").join("config.toml"),
        &offline_config(),
    )
    .expect("write config");

    let output = devagent(&workdir)
        .arg("project")
        .output()
        .expect("devagent project");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Summary: no instructions"), "stdout: {stdout}");
    assert!(!workdir.join("state.json").exists());
}

#[test]
fn code_without_oracle_fails_without_writing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("agent.toml");
    write_config(&config_path, &offline_config()).expect("write config");

    let output = devagent(temp.path())
        .arg("--config")
        .arg(&config_path)
        .args(["code", "a fizzbuzz", "--file", "fizz.py"])
        .output()
        .expect("devagent code");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("all oracle backends failed"), "stderr: {stderr}");
    assert!(!temp.path().join("fizz.py").exists());
}

#[test]
fn invalid_config_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config_dir = temp.path().join(".agent");
    fs::create_dir_all(&config_dir).expect("config dir");
    fs::write(config_dir.join("config.toml"), "command_timeout_secs = 0\n").expect("write");

    let output = devagent(temp.path())
        .args(["task", "anything"])
        .output()
        .expect("devagent task");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("command_timeout_secs"), "stderr: {stderr}");
}

#[test]
fn malformed_config_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("broken.toml");
    fs::write(&config_path, "max_recovery_depth = \"lots\"\n").expect("write");

    let status = devagent(temp.path())
        .arg("--config")
        .arg(&config_path)
        .args(["dev", "build it"])
        .status()
        .expect("devagent dev");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
