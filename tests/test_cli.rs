// CLI integration tests for automation-proxy

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

fn config_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(text.as_bytes()).expect("write config");
    file
}

#[test]
fn test_help_flag_shows_subcommands() {
    let output = Command::new(env!("CARGO_BIN_EXE_automation-proxy"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Help should exit with success");
    assert!(
        stdout.contains("launch") && stdout.contains("profiles"),
        "Help should list subcommands. Got: {}",
        stdout
    );
}

#[test]
fn test_profiles_lists_configured_profiles() {
    let config = config_file(
        "[profiles.work]\ncommand = [\"server\"]\n\n[profiles.home]\ncommand = [\"server\"]\n",
    );

    let output = Command::new(env!("CARGO_BIN_EXE_automation-proxy"))
        .arg("--config")
        .arg(config.path())
        .arg("profiles")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "home\nwork\n");
}

#[test]
fn test_launch_unknown_profile_fails() {
    let config = config_file("[profiles.work]\ncommand = [\"server\"]\n");

    let output = Command::new(env!("CARGO_BIN_EXE_automation-proxy"))
        .arg("--config")
        .arg(config.path())
        .args(["launch", "missing"])
        .output()
        .expect("Failed to execute command");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown profile"));
}

#[test]
fn test_launch_missing_binary_fails() {
    let config = config_file(
        "[profiles.broken]\ncommand = [\"nonexistent-automation-server-xyz123\"]\n",
    );

    let output = Command::new(env!("CARGO_BIN_EXE_automation-proxy"))
        .arg("--config")
        .arg(config.path())
        .args(["launch", "broken"])
        .output()
        .expect("Failed to execute command");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("launch failed"));
}

#[test]
fn test_invalid_config_is_reported() {
    let config = config_file("[profiles.bad]\ncommand = []\n");

    let output = Command::new(env!("CARGO_BIN_EXE_automation-proxy"))
        .arg("--config")
        .arg(config.path())
        .arg("profiles")
        .output()
        .expect("Failed to execute command");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("empty command"));
}
